use std::path::PathBuf;

use flarum_stream::app::RunOptions;

const HELP: &str = "Flarum-Stream — Open a forum discussion near any post.\n\n  --discussion <id>    Discussion to open\n  --near <number>      Post number to jump to (default 1)\n  --config <path>      Config file (default ~/.config/flarum-stream/config.yaml)\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message";

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = flarum_stream::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<RunOptions>, String> {
    let mut discussion = None;
    let mut near = 1u32;
    let mut config_file = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Flarum-Stream {}", flarum_stream::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(None);
            }
            "--discussion" => {
                discussion = Some(args.next().ok_or("--discussion needs a value")?);
            }
            "--near" => {
                let value = args.next().ok_or("--near needs a value")?;
                near = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid post number {value:?}"))?;
            }
            "--config" => {
                config_file = Some(PathBuf::from(args.next().ok_or("--config needs a value")?));
            }
            other => return Err(format!("unknown argument {other:?}")),
        }
    }

    let discussion = discussion.ok_or("--discussion is required")?;
    Ok(Some(RunOptions {
        discussion,
        near,
        config_file,
    }))
}
