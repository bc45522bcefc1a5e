//! Offline inspection of BlockDB backing files.
//!
//! ```text
//! blockdb-inspect <file>                          header and record count
//! blockdb-inspect <file> at <x> <y> <z>           changes at a block
//! blockdb-inspect <file> by <ids> [start] [end]   changes by authors, newest first
//! ```
//!
//! `<ids>` is a comma separated list of author ids; `start` and `end` are
//! seconds since the record epoch.

use std::{
    io::{self, Write},
    time::UNIX_EPOCH,
};

use blockdb::{ChangeRecord, Dims, file::BackingFile};
use eyre::{OptionExt, WrapErr, bail};
use tracing::{info, warn};

fn parse<T: std::str::FromStr>(arg: Option<&String>, what: &str) -> eyre::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let arg = arg.ok_or_eyre(format!("missing {what}"))?;
    arg.parse().wrap_err_with(|| format!("invalid {what}: {arg:?}"))
}

fn print_change(out: &mut impl Write, dims: Dims, change: &ChangeRecord) -> io::Result<()> {
    let unix = change
        .time()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let pos = dims
        .position(change.index)
        .map_or_else(|| format!("#{}", change.index), |p| format!("{},{},{}", p.x, p.y, p.z));
    let (old, new) = (change.old_block(), change.new_block());

    writeln!(
        out,
        "{unix}\tauthor={}\tpos={pos}\t{}:{} -> {}:{}\tflags={:#06x}",
        change.author,
        old.block,
        old.ext,
        new.block,
        new.ext,
        change.flags.bits()
    )
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blockdb_inspect=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let path = args.get(1).ok_or_eyre("usage: blockdb-inspect <file> [at|by ...]")?;

    let file = BackingFile::new(path);
    let Some(dims) = file.read_dims()? else {
        bail!("{path}: missing or no usable header");
    };
    info!("{path}: dims {}x{}x{}", dims.x, dims.y, dims.z);

    let mut out = io::stdout().lock();
    match args.get(2).map(String::as_str) {
        None => {
            writeln!(out, "dims\t{}\t{}\t{}", dims.x, dims.y, dims.z)?;
            writeln!(out, "records\t{}", file.record_count()?)?;
        }
        Some("at") => {
            let pos = blockdb::BlockPos::new(
                parse(args.get(3), "x")?,
                parse(args.get(4), "y")?,
                parse(args.get(5), "z")?,
            );
            let Some(index) = dims.index(pos) else {
                warn!(?pos, "position outside file dimensions");
                return Ok(());
            };

            let mut result = Ok(());
            file.find_at(index, |change| {
                if result.is_ok() {
                    result = print_change(&mut out, dims, change);
                }
            })?;
            result?;
        }
        Some("by") => {
            let ids: String = parse(args.get(3), "author ids")?;
            let authors = ids
                .split(',')
                .map(|id| {
                    id.trim()
                        .parse::<i32>()
                        .wrap_err_with(|| format!("invalid author id {id:?}"))
                })
                .collect::<eyre::Result<Vec<_>>>()?;
            let start = args.get(4).map_or(Ok(i32::MIN), |_| parse(args.get(4), "start"))?;
            let end = args.get(5).map_or(Ok(i32::MAX), |_| parse(args.get(5), "end"))?;

            let mut result = Ok(());
            let reached_start = file.find_by(&authors, start, end, |change| {
                if result.is_ok() {
                    result = print_change(&mut out, dims, change);
                }
            })?;
            result?;

            if !reached_start {
                info!("scanned to the start of the log");
            }
        }
        Some(other) => bail!("unknown command {other:?}, expected `at` or `by`"),
    }

    Ok(())
}
