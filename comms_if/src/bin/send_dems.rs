//! Demands sender for bench testing the helm exec.
//!
//! Sends a fixed throttle/rudder demand to the exec at a fixed rate. Stop sending (Ctrl-C, or use
//! `--count`) to watch the exec's failsafe return the servos to neutral.
//!
//! ```text
//! send_dems --endpoint 127.0.0.1:2031 --throttle 50 --rudder=-20 --rate-hz 10
//! ```

use std::{net::SocketAddr, thread, time::Duration};

use structopt::StructOpt;

use comms_if::{
    eqpt::servo::ServoDems,
    net::{DemsSocket, SocketOptions},
};

#[derive(Debug, StructOpt)]
#[structopt(name = "send_dems", about = "Send throttle and rudder demands to the helm exec")]
struct Opts {
    /// Address of the helm exec's demands socket
    #[structopt(short, long, default_value = "127.0.0.1:2031")]
    endpoint: SocketAddr,

    /// Throttle demand in percent, [0, 100]
    #[structopt(short, long, default_value = "0", allow_hyphen_values = true)]
    throttle: f64,

    /// Rudder demand in percent, [-100, 100], negative to port
    #[structopt(short, long, default_value = "0", allow_hyphen_values = true)]
    rudder: f64,

    /// Rate at which to send demands
    #[structopt(long, default_value = "10")]
    rate_hz: f64,

    /// Number of packets to send, sends forever if not given
    #[structopt(short, long)]
    count: Option<u64>,

    /// Send this raw payload instead of the throttle/rudder demands
    #[structopt(long)]
    raw: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::from_args();

    let period = rate_to_period(opts.rate_hz)
        .ok_or_else(|| format!("Rate must be a positive number, found {}", opts.rate_hz))?;

    // Create the socket
    let socket = DemsSocket::new(&SocketOptions::default(), opts.endpoint)?;

    let dems = ServoDems::new(opts.throttle, opts.rudder);
    let description = match opts.raw {
        Some(ref r) => format!("{:?}", r),
        None => format!("{:?}", dems.to_packet())
    };

    println!("Sending {} to {} at {} Hz", description, opts.endpoint, opts.rate_hz);
    if opts.raw.is_none() && !(dems.throttle_valid() && dems.rudder_valid()) {
        println!("Warning: {} is out of range and will be rejected by the exec", dems);
    }

    let mut num_sent: u64 = 0;

    loop {
        if let Some(c) = opts.count {
            if num_sent >= c {
                break;
            }
        }

        // A refused send just means the exec isn't up yet, so keep trying
        let result = match opts.raw {
            Some(ref r) => socket.send_raw(r.as_bytes()),
            None => socket.send_dems(&dems)
        };

        match result {
            Ok(_) => num_sent += 1,
            Err(e) => println!("could not send: {}", e)
        }

        thread::sleep(period);
    }

    println!("Sent {} packets", num_sent);

    Ok(())
}

/// Period of the send loop, or `None` if the rate is not positive or gives an unrepresentable
/// period.
fn rate_to_period(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }

    Duration::try_from_secs_f64(1.0 / rate_hz).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rate_to_period() {
        assert_eq!(rate_to_period(10.0), Some(Duration::from_millis(100)));
        assert_eq!(rate_to_period(0.0), None);
        assert_eq!(rate_to_period(-1.0), None);
        assert_eq!(rate_to_period(f64::NAN), None);

        // Positive but far too slow for a Duration
        assert_eq!(rate_to_period(1e-300), None);
    }
}
