//! PromptGen command-line client
//!
//! Every invocation restores the persisted session, runs one command and
//! exits. Routes are checked with the same guard the UI uses.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{
    Cli, Commands, ConfigArgs, GenerateArgs, LoginArgs, OpenArgs, RefreshModeArg, RegisterArgs,
};
use log::{debug, info, LevelFilter};
use promptgen_core::auth::{
    GuardDecision, LoginRequest, RegisterRequest, RequestAuthorizer, RouteGuard, SessionManager,
    SessionOrigin, DEFAULT_LOGIN_ROUTE,
};
use promptgen_core::settings::{get_settings_path, load_settings, save_settings, RefreshMode};
use promptgen_core::{AuthError, PromptClient, PromptRequest};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .filter_module("reqwest", LevelFilter::Warn)
        .init();

    info!("Starting PromptGen CLI v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Config(args) = cli.command {
        return configure(cli.api_url, cli.data_dir, args);
    }

    let mut settings = load_settings();
    settings.apply_env_overrides();
    if let Some(url) = cli.api_url {
        settings.api_base_url = url;
    }
    if let Some(dir) = cli.data_dir {
        settings.data_dir = Some(dir);
    }
    debug!("Settings file: {:?}", get_settings_path());

    let session = SessionManager::with_file_store(settings).map_err(auth_failure)?;

    let result = match cli.command {
        Commands::Login(args) => login(&session, args).await,
        Commands::Register(args) => register(&session, args).await,
        Commands::Logout => logout(&session).await,
        Commands::Status => status(&session).await,
        Commands::Validate => validate(&session).await,
        Commands::Open(args) => open(&session, args).await,
        Commands::Generate(args) => generate(&session, args).await,
        Commands::Config(_) => Ok(()),
    };

    session.shutdown();
    result
}

fn auth_failure(e: AuthError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

async fn login(session: &SessionManager, args: LoginArgs) -> Result<()> {
    let user = session
        .login(&LoginRequest::new(args.identifier, args.password))
        .await
        .map_err(auth_failure)?;

    println!("Signed in as {} ({})", user.display_name, user.identifier);
    if session.origin() == Some(SessionOrigin::DevFallback) {
        println!("Warning: backend unreachable, using a DEVELOPMENT session");
    }
    Ok(())
}

async fn register(session: &SessionManager, args: RegisterArgs) -> Result<()> {
    let confirm_password = args.confirm_password.unwrap_or_else(|| args.password.clone());
    let request = RegisterRequest {
        full_name: args.name,
        email: args.email,
        password: args.password,
        confirm_password,
    };

    let user = session.register(&request).await.map_err(auth_failure)?;
    println!("Account created. Signed in as {}", user.display_name);
    Ok(())
}

async fn logout(session: &SessionManager) -> Result<()> {
    session.initialize().await;
    session.logout().await;
    println!("Signed out");
    Ok(())
}

async fn status(session: &SessionManager) -> Result<()> {
    let status = session.initialize().await;
    let snapshot = session.snapshot();

    let output = serde_json::json!({
        "status": status.as_str(),
        "user": snapshot.user,
        "development": session.origin() == Some(SessionOrigin::DevFallback),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to format status")?
    );
    Ok(())
}

async fn validate(session: &SessionManager) -> Result<()> {
    session.initialize().await;
    if !session.is_authenticated() {
        bail!("Not signed in");
    }

    let user = session.validate().await.map_err(auth_failure)?;
    println!("Session valid for {}", user.identifier);
    Ok(())
}

async fn open(session: &SessionManager, args: OpenArgs) -> Result<()> {
    session.initialize().await;

    let guard = RouteGuard::new(session.clone(), DEFAULT_LOGIN_ROUTE);
    match guard.check(&args.route) {
        GuardDecision::Allow => println!("Opening {}", args.route),
        GuardDecision::Redirect { to, return_to } => {
            println!("Sign in required: redirecting to {}?returnUrl={}", to, return_to)
        }
    }
    Ok(())
}

async fn generate(session: &SessionManager, args: GenerateArgs) -> Result<()> {
    session.initialize().await;

    let guard = RouteGuard::new(session.clone(), DEFAULT_LOGIN_ROUTE);
    if let GuardDecision::Redirect { .. } = guard.check("/generator") {
        bail!("Not signed in. Run `promptgen login` first.");
    }

    let prompts = PromptClient::new(RequestAuthorizer::new(session.clone()));
    let request = PromptRequest {
        input: args.input,
        provider: args.provider,
        category: args.category,
    };

    let response = match prompts.generate(&request).await {
        Ok(response) => response,
        Err(AuthError::Unauthorized) => bail!("Session expired, please sign in again"),
        Err(e) => return Err(auth_failure(e)),
    };

    match response.get("prompt").and_then(|p| p.as_str()) {
        Some(prompt) => println!("{}", prompt),
        None => println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to format response")?
        ),
    }
    Ok(())
}

/// Persist flag values to settings.json. Environment overrides are not saved.
fn configure(
    api_url: Option<String>,
    data_dir: Option<std::path::PathBuf>,
    args: ConfigArgs,
) -> Result<()> {
    let mut settings = load_settings();
    if let Some(url) = api_url {
        settings.api_base_url = url;
    }
    if let Some(dir) = data_dir {
        settings.data_dir = Some(dir);
    }
    if let Some(mode) = args.refresh_mode {
        settings.refresh_mode = match mode {
            RefreshModeArg::Token => RefreshMode::Token,
            RefreshModeArg::Cookie => RefreshMode::Cookie,
        };
    }
    if let Some(use_keyring) = args.use_keyring {
        settings.use_keyring = use_keyring;
    }

    save_settings(&settings).map_err(anyhow::Error::msg)?;
    match get_settings_path() {
        Some(path) => println!("Saved settings to {}", path.display()),
        None => println!("Saved settings"),
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&settings).context("Failed to format settings")?
    );
    Ok(())
}
