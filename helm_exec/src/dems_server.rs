//! # Demands Server Module
//!
//! This module abstracts over the networking side of the helm executable. The server receives
//! demands datagrams from any client, writes valid demands into the [`DemsStore`] and enforces the
//! failsafe: if no valid demand arrives within the timeout the neutral demand is written instead.
//!
//! The failsafe is measured from the last *valid* demand, not from the last datagram, so a client
//! sending a continuous stream of malformed packets cannot keep the servos at their last position.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::servo::ServoDems,
    net::{DemsRecvError, DemsSocket, DemsSocketError, SocketOptions},
};
use log::{debug, info, trace, warn};

use crate::{cancel::CancelToken, dems_store::DemsStore, params::HelmExecParams};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest time spent blocked in a single receive, bounds the time taken to observe cancellation.
const MAX_RECV_BLOCK: Duration = Duration::from_millis(100);

/// Time to wait after a socket error before receiving again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the helm executable.
pub struct DemsServer {

    /// UDP socket bound to the demands endpoint
    socket: DemsSocket,

    /// Store valid demands are written into
    store: DemsStore,

    /// Failsafe timeout
    timeout: Duration,

    /// Time at which the neutral demand will be written unless a valid demand arrives first
    failsafe_deadline: Instant,

    /// True while the store holds the failsafe demand rather than a received one
    safe_mode: bool,

    num_valid: u64,

    num_discarded: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of a single [`DemsServer::poll`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome {
    /// A valid demand was received and stored
    Demand(ServoDems),

    /// The failsafe timeout expired and the neutral demand was stored
    Timeout,

    /// A malformed datagram was received and discarded, the store is unchanged
    Discarded,

    /// Nothing was received but the failsafe timeout hasn't expired yet
    Waiting,

    /// The socket reported an error, the neutral demand was stored
    RecvError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DemsServer {

    /// Create a new instance of the demands server, bound to the endpoint in the parameters.
    ///
    /// The server starts in safe mode. Parameters must have been validated.
    pub fn new(params: &HelmExecParams, store: DemsStore) -> Result<Self, DemsSocketError> {
        // No address reuse, a second exec on the same port must fail rather than steal demands
        let socket_options = SocketOptions {
            bind: true,
            reuse_addr: false,
            ..Default::default()
        };

        let socket = DemsSocket::new(&socket_options, params.endpoint())?;
        let timeout = params.recv_timeout();

        Ok(Self {
            socket,
            store,
            timeout,
            failsafe_deadline: Instant::now() + timeout,
            safe_mode: true,
            num_valid: 0,
            num_discarded: 0,
        })
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, DemsSocketError> {
        self.socket.local_addr()
    }

    /// Receive at most one datagram and update the store.
    ///
    /// Blocks for at most [`MAX_RECV_BLOCK`], or until the failsafe deadline if that is sooner.
    pub fn poll(&mut self) -> PollOutcome {
        let remaining = self.failsafe_deadline.saturating_duration_since(Instant::now());

        // A zero read timeout is rejected by the OS, so an expired deadline skips the receive
        if remaining == Duration::from_secs(0) {
            self.failsafe();
            return PollOutcome::Timeout;
        }

        if let Err(e) = self.socket.set_recv_timeout(Some(remaining.min(MAX_RECV_BLOCK))) {
            warn!("Could not set the receive timeout: {}", e);
            self.enter_safe_mode();
            return PollOutcome::RecvError;
        }

        match self.socket.recv_dems() {
            Ok((dems, sender)) => {
                trace!("Received {} from {}", dems, sender);

                self.store.set(dems);
                self.failsafe_deadline = Instant::now() + self.timeout;
                self.num_valid += 1;

                if self.safe_mode {
                    info!("Received valid demand from {}, exiting safe mode", sender);
                    self.safe_mode = false;
                }

                PollOutcome::Demand(dems)
            },
            Err(DemsRecvError::Timeout) => {
                if Instant::now() >= self.failsafe_deadline {
                    self.failsafe();
                    PollOutcome::Timeout
                }
                else {
                    PollOutcome::Waiting
                }
            },
            Err(DemsRecvError::InvalidDems(sender, e)) => {
                self.num_discarded += 1;
                warn!(
                    "Discarding invalid demand from {}: {} ({} discarded so far)",
                    sender, e, self.num_discarded
                );
                PollOutcome::Discarded
            },
            Err(DemsRecvError::RecvError(e)) => {
                warn!("Could not receive from the demands socket: {}", e);
                self.enter_safe_mode();
                PollOutcome::RecvError
            }
        }
    }

    /// Poll the socket until the token is cancelled.
    pub fn run(&mut self, cancel: &CancelToken) {
        info!(
            "Demands server listening on {:?} with a {:?} failsafe timeout",
            self.local_addr().ok(),
            self.timeout
        );

        while !cancel.is_cancelled() {
            if self.poll() == PollOutcome::RecvError && cancel.sleep(RECV_ERROR_BACKOFF) {
                break;
            }
        }

        debug!(
            "Demands server stopped ({} valid demands, {} discarded)",
            self.num_valid, self.num_discarded
        );
    }

    /// Handle the failsafe deadline expiring.
    fn failsafe(&mut self) {
        if self.safe_mode {
            debug!("No demands received in {:?}, holding neutral", self.timeout);
        }
        else {
            warn!("No valid demand received in {:?}, entering safe mode", self.timeout);
        }
        self.enter_safe_mode();
    }

    fn enter_safe_mode(&mut self) {
        self.store.set_neutral();
        self.safe_mode = true;
        self.failsafe_deadline = Instant::now() + self.timeout;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn server(timeout_s: f64) -> (DemsServer, DemsStore, DemsSocket) {
        let params = HelmExecParams {
            port: 0,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout_s,
            ..Default::default()
        };
        let store = DemsStore::new();
        let server = DemsServer::new(&params, store.clone()).unwrap();

        let client = DemsSocket::new(
            &SocketOptions::default(),
            server.local_addr().unwrap()
        ).unwrap();

        (server, store, client)
    }

    /// Poll until something other than `Waiting` happens.
    fn poll_event(server: &mut DemsServer) -> PollOutcome {
        loop {
            match server.poll() {
                PollOutcome::Waiting => continue,
                o => return o
            }
        }
    }

    #[test]
    fn test_valid_demand() {
        let (mut server, store, client) = server(1.0);
        assert!(server.safe_mode);

        client.send_raw(b"50,0").unwrap();
        assert_eq!(poll_event(&mut server), PollOutcome::Demand(ServoDems::new(50.0, 0.0)));
        assert_eq!(store.get(), ServoDems::new(50.0, 0.0));
        assert!(!server.safe_mode);

        // Out of range demands are stored as they are
        client.send_raw(b"150,0\n").unwrap();
        assert_eq!(poll_event(&mut server), PollOutcome::Demand(ServoDems::new(150.0, 0.0)));
        assert_eq!(store.get(), ServoDems::new(150.0, 0.0));
    }

    #[test]
    fn test_malformed_keeps_state() {
        let (mut server, store, client) = server(1.0);

        client.send_raw(b"40,10").unwrap();
        assert_eq!(poll_event(&mut server), PollOutcome::Demand(ServoDems::new(40.0, 10.0)));

        let garbage: [&[u8]; 6] = [b"garbage", b"", b"40", b"1,2,3", b"nan,0", &[0xff, 0xfe]];
        for packet in garbage.iter() {
            client.send_raw(packet).unwrap();
            assert_eq!(poll_event(&mut server), PollOutcome::Discarded, "{:?}", packet);
            assert_eq!(store.get(), ServoDems::new(40.0, 10.0));
        }

        assert!(!server.safe_mode);
    }

    #[test]
    fn test_timeout_writes_neutral() {
        let (mut server, store, client) = server(0.2);

        client.send_raw(b"40,10").unwrap();
        poll_event(&mut server);
        assert_eq!(store.get(), ServoDems::new(40.0, 10.0));

        let start = Instant::now();
        assert_eq!(poll_event(&mut server), PollOutcome::Timeout);
        let elapsed = start.elapsed();

        assert_eq!(store.get(), ServoDems::NEUTRAL);
        assert!(server.safe_mode);
        assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);

        // Traffic resumes
        client.send_raw(b"20,-5").unwrap();
        assert_eq!(poll_event(&mut server), PollOutcome::Demand(ServoDems::new(20.0, -5.0)));
        assert!(!server.safe_mode);
    }

    #[test]
    fn test_garbage_stream_still_fails_safe() {
        let (mut server, store, client) = server(0.2);

        client.send_raw(b"40,10").unwrap();
        poll_event(&mut server);

        // Send garbage faster than the timeout for well over the timeout
        let start = Instant::now();
        let mut timed_out_after = None;
        while start.elapsed() < Duration::from_millis(600) {
            client.send_raw(b"garbage").unwrap();
            if poll_event(&mut server) == PollOutcome::Timeout && timed_out_after.is_none() {
                timed_out_after = Some(start.elapsed());
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let timed_out_after = timed_out_after.expect("Failsafe never triggered");
        assert!(timed_out_after < Duration::from_millis(400), "{:?}", timed_out_after);
        assert_eq!(store.get(), ServoDems::NEUTRAL);
    }

    #[test]
    fn test_second_bind_fails() {
        let (server, _store, _client) = server(1.0);
        let port = server.local_addr().unwrap().port();

        let params = HelmExecParams {
            port,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        };
        assert!(DemsServer::new(&params, DemsStore::new()).is_err());
    }

    #[test]
    fn test_run_stops_on_cancel() {
        let (mut server, store, client) = server(5.0);

        let cancel = CancelToken::new();
        let handle = {
            let cancel = cancel.clone();
            std::thread::spawn(move || server.run(&cancel))
        };

        client.send_raw(b"10,10").unwrap();
        let start = Instant::now();
        while store.get() != ServoDems::new(10.0, 10.0) {
            assert!(start.elapsed() < Duration::from_secs(2));
            std::thread::sleep(Duration::from_millis(5));
        }

        // Cancellation is observed well before the 5 s failsafe timeout
        let cancelled_at = Instant::now();
        cancel.cancel();
        handle.join().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    }
}
