use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::compression::Compression;

#[derive(Parser)]
#[command(name = "ponzu")]
#[command(about = "Block-aligned archive container")]
#[command(author, version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pack files and directories into an archive
    Create {
        /// Archive to write
        archive: PathBuf,

        /// Files or directories to pack
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Body codec for file content
        #[arg(short, long, value_enum, default_value_t = CompressionArg::Zstd)]
        compression: CompressionArg,

        /// Path prefix recorded in the archive header
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Free-form comment recorded in the archive header
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Unpack an archive into a directory
    Extract {
        /// Archive to read
        archive: PathBuf,

        /// Directory to unpack into
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,

        /// Skip body checksum validation
        #[arg(long)]
        no_verify: bool,
    },

    /// List the records of an archive without unpacking it
    Inspect {
        /// Archive to read
        archive: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CompressionArg {
    None,
    Zstd,
    Brotli,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Compression {
        match arg {
            CompressionArg::None => Compression::None,
            CompressionArg::Zstd => Compression::Zstd,
            CompressionArg::Brotli => Compression::Brotli,
        }
    }
}
