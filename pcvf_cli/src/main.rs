use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use pcvf_core::reader::{PacketKind, SectionReader};
use pcvf_core::PagedFile;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pcvf",
    about = "Point Cloud Vector Format — inspect PCVF1 container files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print file header, section header, and packet statistics
    Inspect {
        /// PCVF1 file to inspect
        file: PathBuf,
        /// Walk the section and list every packet
        #[arg(long)]
        packets: bool,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_inspect(path: PathBuf, list_packets: bool) -> anyhow::Result<()> {
    let mut file = PagedFile::open(&path)
        .with_context(|| format!("opening {}", path.display()))?;

    println!("file:                {}", path.display());
    println!("physical length:     {}", human_bytes(file.physical_length()));
    println!("record count:        {}", file.record_count());

    let section_start = file.section_logical_start();
    if section_start == 0 {
        println!("section:             none");
        return Ok(());
    }
    println!("section start:       logical {}", section_start);

    let contents = SectionReader::new(&mut file, section_start)
        .read_section()
        .context("walking the compressed-vector section")?;

    println!(
        "section length:      {}",
        human_bytes(contents.header.section_logical_length)
    );
    println!(
        "first data packet:   physical {}",
        contents.header.data_physical_offset
    );
    println!(
        "index packet:        physical {}",
        contents.header.index_physical_offset
    );
    println!("data packets:        {}", contents.data_packet_count);
    println!("bytestreams:         {}", contents.bytestreams.len());
    for (i, stream) in contents.bytestreams.iter().enumerate() {
        println!("  stream {i}: {}", human_bytes(stream.len() as u64));
    }

    if list_packets {
        println!();
        println!("{:<8} {:>12} {:>8} {:>8}", "kind", "logical", "length", "streams");
        for packet in &contents.packets {
            let kind = match packet.kind {
                PacketKind::Data => "data",
                PacketKind::Index => "index",
            };
            println!(
                "{:<8} {:>12} {:>8} {:>8}",
                kind, packet.logical_offset, packet.length, packet.bytestream_count
            );
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { file, packets } => run_inspect(file, packets),
    }
}
