//! keyka-tool — CLI for keyka key-value files
//!
//! Pack sorted key/value pairs into a keyka file and query it back.
//!
//! # Usage
//!
//! ```text
//! keyka-tool pack <file>                 Pack key<TAB>value lines from stdin
//! keyka-tool get <file> <key>            Exact lookup
//! keyka-tool scan <file> [low] [high]    Ordered scan over [low, high)
//! keyka-tool info <file>                 File overview
//! ```

mod style;

use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::process;

use keyka::{KeykaFile, KeykaWriter};
use style::{format_commas, format_size, header, kv, BOLD, CYAN, DIM, GREEN, RED, RESET};

type ToolResult = Result<(), Box<dyn Error>>;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "pack" => cmd_pack(&args[2..]),
        "get" => cmd_get(&args[2..]),
        "scan" => cmd_scan(&args[2..]),
        "info" => cmd_info(&args[2..]),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            eprintln!("{RED}Unknown command: {}{RESET}", args[1]);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("{RED}error:{RESET} {e}");
        process::exit(1);
    }
}

/// Pack `key<TAB>value` lines from stdin into a new keyka file.
///
/// Input must already be sorted by key; the library rejects violations.
/// Keys therefore cannot contain tabs or newlines.
fn cmd_pack(args: &[String]) -> ToolResult {
    let [path] = args else {
        return Err("usage: keyka-tool pack <file>".into());
    };

    let sink = BufWriter::new(File::create(path)?);
    let mut writer = KeykaWriter::new(sink)?;

    let stdin = io::stdin();
    for (line_no, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('\t') else {
            return Err(format!("line {}: expected key<TAB>value", line_no + 1).into());
        };
        let value: u64 = value
            .trim()
            .parse()
            .map_err(|_| format!("line {}: invalid value {value:?}", line_no + 1))?;
        writer.add(key.as_bytes(), value)?;
    }

    let count = writer.len() as u64;
    writer.finish()?;
    eprintln!(
        "{GREEN}packed{RESET} {} entries into {path}",
        format_commas(count)
    );
    Ok(())
}

/// Exact lookup; prints the value, exits 1 when the key is absent.
fn cmd_get(args: &[String]) -> ToolResult {
    let [path, key] = args else {
        return Err("usage: keyka-tool get <file> <key>".into());
    };

    let file = KeykaFile::open(path)?;
    match file.find_exact(key.as_bytes())? {
        Some(value) => println!("{value}"),
        None => {
            eprintln!("{DIM}not found{RESET}");
            process::exit(1);
        }
    }
    Ok(())
}

/// Ordered scan over `[low, high)`, one `key<TAB>value` line per pair.
fn cmd_scan(args: &[String]) -> ToolResult {
    let (path, low, high) = match args {
        [path] => (path, None, None),
        [path, low] => (path, Some(low), None),
        [path, low, high] => (path, Some(low), Some(high)),
        _ => return Err("usage: keyka-tool scan <file> [low] [high]".into()),
    };

    let file = KeykaFile::open(path)?;
    let low = low.map(|s| s.as_bytes()).unwrap_or(b"");
    let high = high.map(|s| s.as_bytes());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for pair in file.find_range(low, high, true, false)? {
        let (key, value) = pair?;
        out.write_all(&key)?;
        writeln!(out, "\t{value}")?;
    }
    out.flush()?;
    Ok(())
}

/// Overview of a keyka file: size, entry count, key statistics.
fn cmd_info(args: &[String]) -> ToolResult {
    let [path] = args else {
        return Err("usage: keyka-tool info <file>".into());
    };

    let size = std::fs::metadata(path)?.len();
    let file = KeykaFile::open(path)?;

    let mut entries = 0u64;
    let mut key_bytes = 0u64;
    let mut first: Option<Vec<u8>> = None;
    let mut last: Option<Vec<u8>> = None;
    for pair in file.iter()? {
        let (key, _) = pair?;
        entries += 1;
        key_bytes += key.len() as u64;
        if first.is_none() {
            first = Some(key.clone());
        }
        last = Some(key);
    }

    header(path);
    kv("format", "keyka v0");
    kv("file size", &format_size(size));
    kv("entries", &format_commas(entries));
    match (first, last) {
        (Some(first), Some(last)) => {
            kv("key bytes", &format_size(key_bytes));
            kv("first key", &String::from_utf8_lossy(&first));
            kv("last key", &String::from_utf8_lossy(&last));
        }
        _ => kv("state", "empty"),
    }
    println!();
    Ok(())
}

fn print_usage() {
    eprintln!(
        r#"
{BOLD}keyka-tool{RESET} — static key-value file explorer

{DIM}Pack sorted key/value pairs once, look them up forever{RESET}

{BOLD}USAGE:{RESET}
    keyka-tool <COMMAND> [ARGS]

{BOLD}COMMANDS:{RESET}
    {GREEN}pack{RESET}    {CYAN}<file>{RESET}                Pack key<TAB>value lines from stdin (pre-sorted)
    {GREEN}get{RESET}     {CYAN}<file> <key>{RESET}          Exact lookup, prints the value
    {GREEN}scan{RESET}    {CYAN}<file> [low] [high]{RESET}   Ordered scan over [low, high)
    {GREEN}info{RESET}    {CYAN}<file>{RESET}                File overview

{BOLD}EXAMPLES:{RESET}
    sort words.tsv | keyka-tool pack words.keyka
    keyka-tool get words.keyka zebra
    keyka-tool scan words.keyka apple banana
"#
    );
}
