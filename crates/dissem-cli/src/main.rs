//! # Dissem CLI
//!
//! Command-line utilities for building, decoding and sizing frames.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dissem_core::{ImageGuid, Key, Message, Version};
use std::env;
use uuid::Uuid;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        cmd @ ("summary" | "data") => {
            if args.len() < 5 {
                eprintln!("Usage: dissem {cmd} <key> <version> <base64-value> [--guid <uuid>]");
                std::process::exit(1);
            }
            let key = parse_key(&args[2])?;
            let version = Version::from_raw(
                parse_number(&args[3])
                    .and_then(|v| u32::try_from(v).context("version exceeds 32 bits"))?,
            );
            let value = STANDARD.decode(&args[4]).context("Invalid base64 value")?;
            let origin = parse_guid_flag(&args[5..])?;

            let msg = if cmd == "data" {
                Message::data(key, version, &value)
            } else {
                Message::summary(key, version, &value)
            };
            let frame = dissem_proto::encode(&msg.with_origin(origin));
            println!("{}", STANDARD.encode(frame));
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: dissem decode <base64-frame>");
                std::process::exit(1);
            }
            let frame = STANDARD.decode(&args[2]).context("Invalid base64 frame")?;
            let msg = dissem_proto::decode(&frame).context("Failed to decode frame")?;
            println!("{}", serde_json::to_string_pretty(&msg)?);
        }
        "key" => {
            if args.len() < 3 {
                eprintln!("Usage: dissem key <n>");
                std::process::exit(1);
            }
            let key = parse_key(&args[2])?;
            let half = if key.is_generated() {
                "generated"
            } else {
                "assigned"
            };
            println!("{key} {half} index={}", key.index());
        }
        "max-size" => {
            if args.len() < 3 {
                eprintln!("Usage: dissem max-size <mtu> [--guid]");
                std::process::exit(1);
            }
            let mtu = usize::try_from(parse_number(&args[2])?).context("MTU too large")?;
            let with_guid = args[3..].iter().any(|a| a == "--guid");
            println!("{}", dissem_proto::max_value_size(mtu, with_guid));
        }
        "guid" => {
            println!("{}", Uuid::new_v4());
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_number(input: &str) -> Result<u64> {
    let parsed = match input.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.with_context(|| format!("Invalid number '{input}'"))
}

fn parse_key(input: &str) -> Result<Key> {
    let raw = u16::try_from(parse_number(input)?).context("key exceeds 16 bits")?;
    Ok(Key::from_raw(raw))
}

fn parse_guid_flag(rest: &[String]) -> Result<Option<ImageGuid>> {
    match rest {
        [] => Ok(None),
        [flag, guid] if flag == "--guid" => {
            let id = Uuid::parse_str(guid).context("Invalid image GUID")?;
            Ok(Some(ImageGuid::new(id)))
        }
        _ => bail!("unexpected arguments: {}", rest.join(" ")),
    }
}

fn print_help() {
    println!(
        r#"Dissem CLI

USAGE:
    dissem <COMMAND> [OPTIONS]

COMMANDS:
    summary <key> <version> <value>   Build a summary frame (base64 output)
    data <key> <version> <value>      Build a data frame (base64 output)
    decode <frame>                    Decode a base64 frame to JSON
    key <n>                           Show which half of the key space <n> is in
    max-size <mtu> [--guid]           Largest value that fits in one frame
    guid                              Generate a random image GUID
    help                              Show this help message

OPTIONS:
    --guid <uuid>   Stamp summary/data frames with an image GUID

EXAMPLES:
    dissem data 5 1 Kg==
    dissem decode AQAFAAAAASo=
    dissem max-size 512 --guid
"#
    );
}
