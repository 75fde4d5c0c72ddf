//! `lode tool`

use anyhow::Result;

/// Report which toolchain executables lode can find.
pub fn run() -> Result<()> {
    for tool in ["cc", "clang", "gcc", "ar", "git"] {
        match which::which(tool) {
            Ok(path) => println!("{tool}: {}", path.display()),
            Err(_) => println!("{tool}: not found"),
        }
    }
    Ok(())
}
