use drover_core::{Config, Paths};
use std::io::{self, Write};

pub async fn run(
    api_key: Option<String>,
    base_url: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();

    // Check if config exists
    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    paths.ensure_dirs()?;

    let mut config = Config::default();
    if let Some(api_key) = api_key {
        config.api.api_key = api_key;
    }
    if let Some(base_url) = base_url {
        config.api.base_url = base_url;
    }
    config.save(&paths.config_file())?;
    println!("✓ Created config: {}", paths.config_file().display());

    println!();
    println!("Next steps:");
    if config.api.api_key.is_empty() {
        println!(
            "  1. Edit {} to add your API key",
            paths.config_file().display()
        );
        println!("  2. Run `drover sessions` to verify connectivity");
    } else {
        println!("  1. Run `drover sessions` to verify connectivity");
        println!("  2. Run `drover run remove --help` to see task options");
    }

    Ok(())
}
