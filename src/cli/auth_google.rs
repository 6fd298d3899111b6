use crate::config::{AppConfig, DriveConfig};
use crate::drive::google::{code_from_redirect, ClientSecret};
use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

const DEFAULT_CLIENT_SECRET_FILE: &str = "google-client-secret.json";
const DEFAULT_TOKEN_FILE: &str = "google-token.json";

#[derive(Args)]
pub struct AuthGoogleArgs {
    /// OAuth2 client secret downloaded from the Google Cloud console
    #[arg(long)]
    pub client_secret_file: Option<PathBuf>,

    /// Where to write the token
    #[arg(long)]
    pub token_file: Option<PathBuf>,
}

/// Walk through the OAuth2 consent flow and save the resulting token.
///
/// Paths not given on the command line come from the first `google_drive`
/// drive of the configuration, then from the defaults.
pub async fn run(args: AuthGoogleArgs, config: &Path) -> anyhow::Result<()> {
    let configured = AppConfig::load(config).ok().and_then(|c| {
        c.drives.into_iter().find_map(|d| match d {
            DriveConfig::GoogleDrive(g) => Some((g.client_secret_file, g.token_file)),
            _ => None,
        })
    });
    let (secret_file, token_file) = match configured {
        Some((secret, token)) => (
            args.client_secret_file.unwrap_or(secret),
            args.token_file.unwrap_or(token),
        ),
        None => (
            args.client_secret_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRET_FILE)),
            args.token_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE)),
        ),
    };

    let secret = ClientSecret::load(&secret_file)
        .await
        .with_context(|| format!("failed to read {}", secret_file.display()))?;

    println!("Open this URL in your browser and grant access:");
    println!();
    println!("{}", secret.authorization_url()?);
    println!();
    println!("Then paste the full URL you were redirected to:");

    let code = read_code(BufReader::new(tokio::io::stdin())).await?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let token = secret
        .exchange_code(&client, &code)
        .await
        .context("failed to exchange authorization code")?;
    token.save(&token_file).await?;

    println!("Token saved to {}", token_file.display());
    Ok(())
}

/// Authorization code from the first line of `input`
async fn read_code<R: AsyncBufRead + Unpin>(mut input: R) -> anyhow::Result<String> {
    let mut redirect = String::new();
    input.read_line(&mut redirect).await?;
    Ok(code_from_redirect(redirect.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_code_from_pasted_redirect() {
        let pasted: &[u8] = b"  http://localhost/?code=4%2Fabc&scope=drive.file\nignored\n";
        assert_eq!(read_code(pasted).await.unwrap(), "4/abc");

        let empty: &[u8] = b"\n";
        assert!(read_code(empty).await.is_err());
    }
}
