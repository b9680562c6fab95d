use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::gateway::Strategy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// YAML config file. Environment variables override its values.
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Address to listen on, overrides config and PORT
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Retrieve a single artifact and exit
    Fetch {
        /// Source url (video page or image)
        url: String,

        /// browser, form_post, token_form, direct_redirect or generative_transform
        #[clap(short, long, default_value = "direct_redirect")]
        strategy: Strategy,

        /// Write the artifact to this file instead of printing it
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Only print the extracted download link
        #[clap(long, default_value = "false")]
        link_only: bool,
    },
}
