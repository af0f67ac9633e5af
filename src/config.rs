//! Listen-address resolution.

/// Address used when neither an explicit address nor `PORT` is given.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

/// Environment variable consulted by [`detect_addr`].
pub const PORT_ENV: &str = "PORT";

/// Picks the address to listen on.
///
/// An explicit `addr` wins. Otherwise `PORT` from the environment gives
/// `0.0.0.0:$PORT` (the convention on Heroku, Cloud Run and friends).
/// Otherwise [`DEFAULT_ADDR`].
pub fn detect_addr(addr: Option<&str>) -> String {
    resolve(addr, std::env::var(PORT_ENV).ok())
}

fn resolve(addr: Option<&str>, port: Option<String>) -> String {
    if let Some(addr) = addr {
        return addr.to_owned();
    }
    match port {
        Some(port) if !port.trim().is_empty() => format!("0.0.0.0:{}", port.trim()),
        _ => DEFAULT_ADDR.to_owned(),
    }
}
