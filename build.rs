//! Build script rendering `hostvol` manual pages with clap-mangen.
//!
//! Writes `hostvol.1` plus one `hostvol-<subcommand>.1` page per subcommand
//! into `OUT_DIR` for packaging.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(man: &Man, out_dir: &Path, page: &str) -> Result<(), Box<dyn Error>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    fs::write(out_dir.join(format!("{page}.1")), buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let command = Cli::command();
    for sub in command.get_subcommands() {
        let page = format!("hostvol-{}", sub.get_name());
        let man = Man::new(sub.clone()).title(page.to_uppercase());
        render(&man, &out_dir, &page)?;
    }
    render(&Man::new(command), &out_dir, "hostvol")
}
