//! Kernel command line parsing.

/// Boot options recognized on the kernel command line.
///
/// Tokens are whitespace-separated `key` or `key=value`; unknown keys are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmdline {
    /// `root=` - path of the root block device.
    pub root: Option<String>,
    /// `rootfstype=` - filesystem type of the root device.
    pub rootfstype: Option<String>,
    /// `live` - boot from a live image instead of an installed root.
    pub live: bool,
}

impl Cmdline {
    pub fn parse(data: &str) -> Self {
        let mut opts = Self::default();
        for token in data.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, value),
                None => (token, ""),
            };
            match key {
                "root" => opts.root = Some(value.to_string()),
                "rootfstype" => opts.rootfstype = Some(value.to_string()),
                "live" => opts.live = true,
                _ => {}
            }
        }
        opts
    }

    pub fn from_proc() -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string("/proc/cmdline")?))
    }
}
