//! CLI argument definitions for the `tdfs` entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Build 2DFS fields onto OCI images
#[derive(Parser)]
#[command(name = "tdfs", version, about = "Build a 2dfs field onto an OCI image")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a 2dfs field from an OCI image link
    Build {
        /// Base image reference
        base: String,

        /// Target image reference
        target: String,

        /// 2dfs manifest file
        #[arg(short = 'f', long = "file", default_value = "2dfs.json")]
        file: PathBuf,

        /// Force pull the base image
        #[arg(long)]
        force_pull: bool,

        /// Export format, supported formats: tar
        #[arg(long = "as", value_name = "FORMAT")]
        export_as: Option<String>,
    },

    /// Commands to manage images
    #[command(subcommand)]
    Image(ImageCommands),

    /// Print the version number of tdfs
    Version,
}

#[derive(Subcommand)]
pub enum ImageCommands {
    /// List local images
    Ls {
        /// Print only the reference list
        #[arg(short = 'q', long = "reference")]
        quiet: bool,
    },

    /// Remove local images
    Rm {
        /// Remove all images
        #[arg(short, long)]
        all: bool,

        /// References to remove
        refs: Vec<String>,
    },

    /// Clean unreferenced cache entries
    Prune,

    /// Export an image to a target file, e.g. `export myimg img.tar.gz`
    Export {
        reference: String,

        target_file: PathBuf,

        /// Select platform, e.g. linux/amd64 or linux/arm64; default: all
        #[arg(long)]
        platform: Option<String>,
    },

    /// Push an image to the registry
    Push {
        reference: String,

        /// Select platform, e.g. linux/amd64 or linux/arm64; default: all
        #[arg(long)]
        platform: Option<String>,
    },
}
