//! Network association manager.
//!
//! Brings the radio up and joins the configured access point before anything
//! talks to the broker. Association timeouts are retried forever; a radio that
//! cannot even initialize is a hardware fault and stops the node.

use core::net::Ipv4Addr;

use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;

use crate::config::WifiCredentials;
use crate::error::{AssociationTimeout, RadioFault};

/// The station-mode radio.
#[allow(async_fn_in_trait)]
pub trait WifiRadio {
    /// Powers the radio up and switches it to station mode.
    async fn init(&mut self) -> Result<(), RadioFault>;

    /// One association attempt, bounded by `timeout`. Returns the leased address.
    async fn associate(
        &mut self,
        credentials: &WifiCredentials,
        timeout: Duration,
    ) -> Result<Ipv4Addr, AssociationTimeout>;
}

/// Initializes the radio and associates, retrying timeouts after `retry_delay`.
///
/// Only returns an error when initialization fails.
pub async fn connect<R, D>(
    radio: &mut R,
    delay: &mut D,
    credentials: &WifiCredentials,
    timeout: Duration,
    retry_delay: Duration,
) -> Result<Ipv4Addr, RadioFault>
where
    R: WifiRadio,
    D: DelayNs,
{
    radio.init().await?;

    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.wrapping_add(1);
        match radio.associate(credentials, timeout).await {
            Ok(ip) => {
                let [a, b, c, d] = ip.octets();
                info!("WiFi associated, IP {}.{}.{}.{}", a, b, c, d);
                return Ok(ip);
            }
            Err(AssociationTimeout) => {
                warn!(
                    "WiFi association attempt {} timed out after {} ms, retrying",
                    attempt,
                    timeout.as_millis()
                );
                delay.delay_ms(retry_delay.as_millis() as u32).await;
            }
        }
    }
}

/// [`connect`], panicking on a radio fault.
pub async fn connect_or_abort<R, D>(
    radio: &mut R,
    delay: &mut D,
    credentials: &WifiCredentials,
    timeout: Duration,
    retry_delay: Duration,
) -> Ipv4Addr
where
    R: WifiRadio,
    D: DelayNs,
{
    match connect(radio, delay, credentials, timeout, retry_delay).await {
        Ok(ip) => ip,
        Err(fault) => {
            error!("WiFi init failed: {}", fault.code);
            panic!("WiFi init failed (code {})", fault.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRadio, RecordingDelay};
    use embassy_futures::block_on;

    fn credentials() -> WifiCredentials {
        WifiCredentials::new("node-ap", "secret")
    }

    #[test]
    fn retries_timeouts_until_associated() {
        let mut radio = MockRadio::new(Ok(()), 3, Ipv4Addr::new(10, 0, 0, 7));
        let mut delay = RecordingDelay::default();

        let ip = block_on(connect(
            &mut radio,
            &mut delay,
            &credentials(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        ))
        .unwrap();

        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(radio.attempts, 4);
        assert_eq!(radio.last_timeout, Some(Duration::from_secs(10)));
        assert_eq!(delay.total_ms(), 3_000);
    }

    #[test]
    fn radio_fault_is_not_retried() {
        let mut radio = MockRadio::new(Err(RadioFault { code: -1 }), 0, Ipv4Addr::UNSPECIFIED);
        let mut delay = RecordingDelay::default();

        let err = block_on(connect(
            &mut radio,
            &mut delay,
            &credentials(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        ));

        assert_eq!(err, Err(RadioFault { code: -1 }));
        assert_eq!(radio.attempts, 0);
    }

    #[test]
    #[should_panic(expected = "WiFi init failed")]
    fn connect_or_abort_panics_on_fault() {
        let mut radio = MockRadio::new(Err(RadioFault { code: -2 }), 0, Ipv4Addr::UNSPECIFIED);
        let mut delay = RecordingDelay::default();
        block_on(connect_or_abort(
            &mut radio,
            &mut delay,
            &credentials(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        ));
    }
}
