use rand::seq::IndexedRandom;
use rand::Rng;

use crate::settings::{FetchConfig, RequestIdentity};
use crate::types::SessionIdentity;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const FIREFOX_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0";
const SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";

pub fn default_identities() -> Vec<RequestIdentity> {
    [CHROME_UA, FIREFOX_UA, SAFARI_UA]
        .into_iter()
        .map(RequestIdentity::new)
        .collect()
}

/// Uniform draw from `pool`; `None` only when the pool is empty.
pub fn pick<'a, T, R: Rng + ?Sized>(pool: &'a [T], rng: &mut R) -> Option<&'a T> {
    pool.choose(rng)
}

/// Draw a user agent and proxy for a new rendering context.
pub fn session_identity<R: Rng + ?Sized>(config: &FetchConfig, rng: &mut R) -> SessionIdentity {
    let user_agent = pick(&config.identities, rng)
        .map(|id| id.user_agent.clone())
        .unwrap_or_else(|| CHROME_UA.to_string());
    let proxy = pick(&config.proxies, rng).cloned();
    SessionIdentity { user_agent, proxy }
}
