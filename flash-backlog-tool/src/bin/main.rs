use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};
use flash_backlog_tool::{
    inspect_image_file,
    BacklogImage,
    Encoding,
    FLASH_SECTOR_SIZE,
};

#[derive(Parser)]
#[command(name = "flash-backlog-tool")]
#[command(about = "flash-backlog image inspector, exporter and generator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the state of every sector of a flash image
    Inspect {
        /// Input binary file path
        input: PathBuf,
    },
    /// Export the records of a flash image to a CSV file, oldest first
    Export {
        /// Input binary file path
        input: PathBuf,

        /// Output CSV file path
        output: PathBuf,

        /// Encoding of the record data: hex or base64
        #[arg(short, long, default_value = "hex", value_parser = parse_encoding)]
        encoding: Encoding,
    },
    /// Generate a flash image from a CSV file
    Generate {
        /// Input CSV file path
        input: PathBuf,

        /// Output binary file path
        output: PathBuf,

        /// Image size in bytes (must be multiple of 4096)
        #[arg(short, long, value_parser = parse_size)]
        size: usize,
    },
}

fn parse_size(s: &str) -> Result<usize, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<usize>().map_err(|e| e.to_string())
    }
}

fn parse_encoding(s: &str) -> Result<Encoding, String> {
    s.parse::<Encoding>().map_err(|e| e.to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { input } => {
            let inspection = inspect_image_file(&input)?;

            println!(
                "Active sector: {}, next record: {}",
                inspection.current_sector, inspection.next_record
            );
            for sector in &inspection.sectors {
                let info = &sector.info;
                println!(
                    "{:>5}  {:<8} {:?}  size {:>3}  written {:>4}/{:<4}  unsent {:>4}{}",
                    sector.index,
                    info.state.to_string(),
                    info.tag,
                    info.record_size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                    info.written,
                    info.capacity,
                    info.unsent,
                    if info.flushed { "  flushed" } else { "" },
                );
            }

            let stats = &inspection.statistics;
            println!(
                "Sectors: {} blank, {} active, {} inactive ({} flushed), {} corrupted",
                stats.sectors.blank,
                stats.sectors.active,
                stats.sectors.inactive,
                stats.sectors.flushed,
                stats.sectors.corrupted
            );
            println!(
                "Records: {} written, {} sent, {} unsent",
                stats.records.written, stats.records.sent, stats.records.unsent
            );

            Ok(())
        }
        Commands::Export {
            input,
            output,
            encoding,
        } => {
            println!("Parsing binary file: {}", input.display());
            let image = BacklogImage::parse_image_file(&input)?;
            println!("Found {} records", image.records.len());

            println!("Writing CSV file...");
            image.to_csv_file(&output, encoding)?;

            println!("Successfully exported records to: {}", output.display());

            Ok(())
        }
        Commands::Generate {
            input,
            output,
            size,
        } => {
            println!("Parsing CSV file: {}", input.display());
            let image = BacklogImage::from_csv_file(&input)?;
            println!("Found {} records", image.records.len());

            println!("Generating flash image...");
            image.generate_image_file(&output, size)?;

            println!("Successfully generated flash image: {}", output.display());
            println!("Size: {} bytes ({} sectors)", size, size / FLASH_SECTOR_SIZE);

            Ok(())
        }
    }
}
