//! Renders `opencodespace.1` plus one `opencodespace-<command>.1` page per
//! subcommand into `OUT_DIR`, straight from the clap definitions.

use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn write_page(command: clap::Command, page: &str, dir: &Path) -> io::Result<()> {
    let mut file = File::create(dir.join(format!("{page}.1")))?;
    Man::new(command).title(page).render(&mut file)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let root = Cli::command();
    let root_name = root.get_name().to_owned();
    for sub in root.get_subcommands() {
        let page = format!("{root_name}-{}", sub.get_name());
        write_page(sub.clone(), &page, &out_dir)?;
    }
    write_page(root, &root_name, &out_dir)?;
    Ok(())
}
