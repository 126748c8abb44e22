use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ROOT: &str = "public";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub root: PathBuf,
}

impl Config {
    /// Reads the port from the `PORT` environment variable and the served
    /// directory from the first positional argument.
    pub fn load() -> Self {
        let port = std::env::var("PORT").ok();
        let root = std::env::args().nth(1);
        Self::from_parts(port.as_deref(), root.as_deref())
    }

    /// Unset, unparsable or out-of-range ports fall back to the default.
    pub fn from_parts(port: Option<&str>, root: Option<&str>) -> Self {
        let port = port
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_PORT);
        let root = PathBuf::from(root.unwrap_or(DEFAULT_ROOT));

        Self { port, root }
    }
}
