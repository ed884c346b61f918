use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use gothic_host::{ScriptEngine, SignalBoard};
use gothic_store::ScriptData;

mod cli;
mod demo;

fn main() -> Result<()> {
    let args = cli::parse()?;

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = args.host_config().context("building host configuration")?;
    let demo = demo::Demo::build();
    let signals = Rc::new(SignalBoard::gameplay());
    let mut engine = ScriptEngine::new(config, demo.shared(), signals.clone());
    if !engine.initialize() {
        bail!("script engine failed to initialise");
    }

    if let Some(path) = &args.load_state {
        let file = File::open(path)
            .with_context(|| format!("opening save record {}", path.display()))?;
        let data = ScriptData::read_from(BufReader::new(file))
            .with_context(|| format!("decoding save record {}", path.display()))?;
        engine.deserialize(&data);
    }

    let summary = engine.load_configured();
    for (path, message) in &summary.failed {
        eprintln!("failed to load {}: {message}", path.display());
    }

    if args.demo_events {
        demo.run_events(&signals);
    }

    for code in &args.exec {
        println!("{}", engine.execute_string(code));
    }

    if args.console {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line.context("reading console input")?;
            if line.trim().is_empty() {
                continue;
            }
            println!("{}", engine.execute_string(&line));
        }
    }

    let data = engine.serialize();
    if let Some(path) = &args.save_state {
        let file = File::create(path)
            .with_context(|| format!("creating save record {}", path.display()))?;
        data.write_to(BufWriter::new(file))
            .with_context(|| format!("writing save record {}", path.display()))?;
    }
    if let Some(path) = &args.state_json {
        let json = data.to_json().context("encoding script storage as JSON")?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    engine.shutdown();
    Ok(())
}
