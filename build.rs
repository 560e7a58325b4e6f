use std::error::Error;
use vergen_git2::{Emitter, Git2Builder};

/// Emits `VERGEN_GIT_DESCRIBE` (`git describe --tags --always --dirty`), the
/// version the binary reports to clap and Sentry.
fn main() -> Result<(), Box<dyn Error>> {
    let git = Git2Builder::default().describe(true, true, None).build()?;

    Emitter::default().add_instructions(&git)?.emit()?;
    Ok(())
}
