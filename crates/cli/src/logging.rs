use crate::error::{ErrorKind, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
fn default_directives(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn,freeze=info",
        1 => "info,freeze=debug",
        _ => "debug,freeze=trace",
    }
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init(verbose: u8, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false);
    let installed = if json { builder.json().try_init() } else { builder.try_init() };
    installed.map_err(|_| exn::Exn::from(ErrorKind::Logging))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "warn,freeze=info")]
    #[case(1, "info,freeze=debug")]
    #[case(5, "debug,freeze=trace")]
    fn test_default_directives(#[case] verbose: u8, #[case] expected: &str) {
        assert_eq!(default_directives(verbose), expected);
        EnvFilter::try_new(expected).unwrap();
    }
}
