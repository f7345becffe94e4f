use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "promptgen")]
#[command(about = "PromptGen CLI - sign in and generate prompts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Backend base URL (overrides settings and PROMPTGEN_API_URL)
    #[arg(short, long, global = true)]
    pub api_url: Option<String>,

    /// Directory holding the persisted session
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login(LoginArgs),
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Sign out and remove stored credentials
    Logout,
    /// Show the current session
    Status,
    /// Confirm the stored session with the backend
    Validate,
    /// Check whether a route may be opened
    Open(OpenArgs),
    /// Generate a prompt
    Generate(GenerateArgs),
    /// Save --api-url, --data-dir and the options below to settings.json
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct LoginArgs {
    /// Email or username
    #[arg(short, long)]
    pub identifier: String,
    #[arg(short, long, env = "PROMPTGEN_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(clap::Args)]
pub struct RegisterArgs {
    #[arg(short, long)]
    pub name: String,
    #[arg(short, long)]
    pub email: String,
    #[arg(short, long, env = "PROMPTGEN_PASSWORD", hide_env_values = true)]
    pub password: String,
    /// Defaults to the password
    #[arg(long)]
    pub confirm_password: Option<String>,
}

#[derive(clap::Args)]
pub struct OpenArgs {
    /// Route path (e.g. /dashboard)
    pub route: String,
}

#[derive(clap::Args)]
pub struct GenerateArgs {
    /// Text to build the prompt from
    pub input: String,
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RefreshModeArg {
    /// Refresh token kept in the session record
    Token,
    /// Refresh token kept by the backend in an http-only cookie
    Cookie,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub refresh_mode: Option<RefreshModeArg>,
    /// Mirror the session record into the OS keyring
    #[arg(long)]
    pub use_keyring: Option<bool>,
}
