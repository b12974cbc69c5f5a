// Tracing setup for the binary
//
// `RUST_LOG` wins when set; otherwise the crate logs at info, or debug with -v.
// Output goes to stderr so stdout stays free for the run summary.

use tracing_subscriber::EnvFilter;

/// Default filter directive for a verbosity flag
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "selfevolve=debug"
    } else {
        "selfevolve=info"
    }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
