/*
 * This file is part of occ-sensors.
 *
 * Copyright (C) 2025 occ-sensors contributors
 *
 * occ-sensors is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * occ-sensors is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with occ-sensors. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use occ_sensors::config::{load_config, load_config_from, MemoryImageConfig};
use occ_sensors::{start, AttributeTree, DiscoveryConfig};

const USAGE: &str = "\
usage: occ-sensors [options] <command>

commands:
  list                 list groups and their endpoints
  read <group>/<name>  print one reading
  dump                 print every reading as JSON
  info                 print the discovered topology and walk report as JSON

options:
  --tree <dir|file.json>   device tree node to read
  --memory-image <file>    read sensors from a memory dump
  --image-base <hex>       physical address of the dump's first byte
  --config <file>          configuration file";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    List,
    Read(String),
    Dump,
    Info,
}

#[derive(Debug, Default)]
struct Args {
    command: Option<Command>,
    tree: Option<PathBuf>,
    memory_image: Option<PathBuf>,
    image_base: Option<u64>,
    config: Option<PathBuf>,
}

fn parse_hex(s: &str) -> Result<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex address {:?}", s))
}

fn parse_args(argv: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut it = argv.iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .cloned()
                .ok_or_else(|| anyhow!("{} needs a value", flag))
        };
        match arg.as_str() {
            "--tree" => args.tree = Some(PathBuf::from(value("--tree")?)),
            "--memory-image" => args.memory_image = Some(PathBuf::from(value("--memory-image")?)),
            "--image-base" => args.image_base = Some(parse_hex(&value("--image-base")?)?),
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
            "list" => args.command = Some(Command::List),
            "dump" => args.command = Some(Command::Dump),
            "info" => args.command = Some(Command::Info),
            "read" => args.command = Some(Command::Read(value("read")?)),
            other => bail!("unknown argument {:?}", other),
        }
    }
    Ok(args)
}

fn resolve_config(args: &Args) -> Result<DiscoveryConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(tree) = &args.tree {
        config.device_tree = tree.clone();
    }
    match (&args.memory_image, args.image_base) {
        (Some(path), Some(base)) => {
            config.memory_image = Some(MemoryImageConfig { path: path.clone(), base });
        }
        (Some(_), None) => bail!("--memory-image needs --image-base"),
        (None, Some(_)) => bail!("--image-base needs --memory-image"),
        (None, None) => {}
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let command = args.command.as_ref().ok_or_else(|| anyhow!("no command given\n\n{}", USAGE))?;
    let config = resolve_config(&args)?;
    let tree = AttributeTree::new();
    let publication = start(&config, tree.clone())?;
    let root = publication.root().to_string();

    match command {
        Command::List => {
            for group in tree.group_names(&root) {
                println!("{}:", group);
                for name in tree.endpoint_names(&root, &group) {
                    println!("  {}", name);
                }
            }
        }
        Command::Read(path) => {
            let value = tree
                .read_path(&root, path)
                .ok_or_else(|| anyhow!("no sensor {} under {}", path, root))?;
            println!("{}", value);
        }
        Command::Dump => {
            println!("{}", serde_json::to_string_pretty(&tree.snapshot(&root))?);
        }
        Command::Info => {
            let info = serde_json::json!({
                "topology": publication.topology().map(|t| t.summary()),
                "walk": publication.report(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    publication.teardown();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return;
    }

    let result = parse_args(&argv).and_then(run);
    if let Err(err) = result {
        eprintln!("occ-sensors: {:#}", err);
        std::process::exit(1);
    }
}
