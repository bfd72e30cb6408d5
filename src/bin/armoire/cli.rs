use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

#[derive(Parser)]
#[command(name = "armoire")]
#[command(about = "Armoire CLI: manage your wardrobe from the terminal")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Backend base URL (overrides ARMOIRE_API_BASE_URL)
    #[arg(short, long, global = true, env = "ARMOIRE_API_BASE_URL")]
    pub api_url: Option<Url>,

    /// File holding the session token (overrides ARMOIRE_TOKEN_PATH)
    #[arg(long, global = true, env = "ARMOIRE_TOKEN_PATH")]
    pub token_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the session token
    Login(LoginArgs),
    /// Create an account and log in
    Register(RegisterArgs),
    /// Remove the stored token
    Logout,
    /// Show whether the stored token is still valid
    Status,
    /// Show the logged-in user's profile
    Whoami,
    /// Wardrobe counts by category and colour
    Stats,
    /// Search the wardrobe
    Search(SearchArgs),
    /// Show one item and its owner
    Show(ShowArgs),
    /// Upload an image; the backend analyses it into a new item
    Upload(UploadArgs),
    /// Change an item's name, description or visibility
    Update(UpdateArgs),
    /// Ask the stylist for a suggestion
    Stylist,
    /// Check the backend is reachable
    Ping,
}

#[derive(clap::Args)]
pub struct LoginArgs {
    #[arg(short, long)]
    pub email: String,
    #[arg(long, env = "ARMOIRE_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(clap::Args)]
pub struct RegisterArgs {
    #[arg(short, long)]
    pub email: String,
    /// Display name
    #[arg(short, long)]
    pub name: String,
    #[arg(long, env = "ARMOIRE_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(clap::Args)]
pub struct SearchArgs {
    /// Free-text query
    #[arg(default_value = "")]
    pub query: String,
    /// Restrict to these categories (repeatable)
    #[arg(long = "category")]
    pub categories: Vec<String>,
    /// Restrict to these colours (repeatable)
    #[arg(long = "color")]
    pub colors: Vec<String>,
    /// Use semantic search
    #[arg(long)]
    pub ai: bool,
}

#[derive(clap::Args)]
pub struct ShowArgs {
    /// Item id
    pub id: String,
}

#[derive(clap::Args)]
pub struct UploadArgs {
    /// Image file (png, jpg, jpeg, bmp or webp)
    pub path: PathBuf,
}

#[derive(clap::Args)]
pub struct UpdateArgs {
    /// Item id
    pub id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    /// Make the item visible to others
    #[arg(long, conflicts_with = "private")]
    pub public: bool,
    /// Hide the item from others
    #[arg(long)]
    pub private: bool,
}
