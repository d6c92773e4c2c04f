//! `dc-format` — reformat annotated JSON.
//!
//! Usage:
//!   dc-format [--indent N | --minify] [--strip-comments]
//!
//! The document is read from stdin and written to stdout, pretty-printed
//! with two spaces unless told otherwise. Block comments are kept.

use std::io::{self, Read, Write};

use data_context::{parse, stringify, Config, DataContext, Indent, StringifyOptions};

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn main() {
    let mut indent = Some(Indent::Spaces(2));
    let mut strip_comments = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--minify" => indent = None,
            "--strip-comments" => strip_comments = true,
            "--indent" => {
                let n = args
                    .next()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or_else(|| fail("--indent expects a number of spaces."));
                indent = Some(Indent::Spaces(n));
            }
            other => fail(format!("Unknown argument: {other}")),
        }
    }

    let mut buf = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut buf) {
        fail(e);
    }

    let mut ctx = DataContext::with_config(Config {
        ignore_metadata: strip_comments,
        ..Config::default()
    });
    let slot = parse(&mut ctx, &buf).unwrap_or_else(|e| fail(e));
    let options = StringifyOptions {
        indent,
        ..StringifyOptions::default()
    };
    let out = stringify(&mut ctx, &slot, &options).unwrap_or_else(|e| fail(e));

    io::stdout().write_all(out.as_bytes()).unwrap();
    io::stdout().write_all(b"\n").unwrap();
}
