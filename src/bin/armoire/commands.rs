use anyhow::{Context, Result};
use colored::Colorize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use armoire_client::token::{decode_claims, now_seconds};
use armoire_client::{
    Armoire, ClothingId, FileTokenStore, ImageUpload, LoginRequest, RegisterRequest,
    SearchClothingParams, TokenStore, UpdateClothingItem,
};

use crate::cli::{LoginArgs, RegisterArgs, SearchArgs, ShowArgs, UpdateArgs, UploadArgs};
use crate::output::{print_json, print_success};

type Client = Armoire<FileTokenStore>;

pub async fn login(client: &Client, args: &LoginArgs) -> Result<()> {
    let response = client
        .login(&LoginRequest::new(&args.email, &args.password))
        .await?;
    let who = response
        .user
        .map(|u| u.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| args.email.clone());
    print_success(&format!("Logged in as {}", who.cyan()));
    Ok(())
}

pub async fn register(client: &Client, args: &RegisterArgs) -> Result<()> {
    let response = client
        .register(&RegisterRequest::new(&args.email, &args.name, &args.password))
        .await?;
    if response.token.is_some() {
        print_success(&format!("Registered and logged in as {}", args.name.cyan()));
    } else {
        print_success(&format!("Registered {}; run `armoire login` next", args.email.cyan()));
    }
    Ok(())
}

pub fn logout(client: &Client) -> Result<()> {
    let had_token = client.session().token()?.is_some();
    client.logout(true)?;
    if had_token {
        print_success("Logged out (token removed)");
    } else {
        println!("No stored token at {}", client.session().store().path().display());
    }
    Ok(())
}

pub fn status(client: &Client) -> Result<()> {
    let store = client.session().store();
    println!("{}: {}", "Token file".cyan(), store.path().display());

    let Some(token) = store.load()? else {
        println!("{}: {}", "Session".cyan(), "logged out".yellow());
        return Ok(());
    };
    let state = if client.is_logged_in() {
        "logged in".green()
    } else {
        "expired or invalid".red()
    };
    println!("{}: {}", "Session".cyan(), state);

    if let Ok(claims) = decode_claims(Some(token.as_str())) {
        if let Some(sub) = claims.subject() {
            println!("{}: {}", "Subject".cyan(), sub);
        }
        if let Some(exp) = claims.expires_at() {
            let when = OffsetDateTime::from_unix_timestamp(exp)
                .ok()
                .and_then(|t| t.format(&Rfc3339).ok())
                .unwrap_or_else(|| exp.to_string());
            let remaining = seconds_left(exp, now_seconds());
            if remaining >= 0 {
                println!("{}: {} ({}s left)", "Expires".cyan(), when, remaining);
            } else {
                println!("{}: {}", "Expired".cyan(), when);
            }
        }
    }
    Ok(())
}

/// Negative once expired. Saturates for hand-crafted extreme `exp` values.
fn seconds_left(exp: i64, now: i64) -> i64 {
    exp.saturating_sub(now)
}

pub async fn whoami(client: &Client) -> Result<()> {
    print_json(&client.load_user().await?)
}

pub async fn stats(client: &Client) -> Result<()> {
    print_json(&client.clothing_stats().await?)
}

pub async fn search(client: &Client, args: &SearchArgs) -> Result<()> {
    let mut params = SearchClothingParams::new(&args.query)
        .with_categories(args.categories.clone())
        .with_colors(args.colors.clone());
    if args.ai {
        params = params.with_ai_search(true);
    }
    let items = client.search_clothing(&params).await?;
    print_json(&items)?;
    eprintln!("{} item(s)", items.len());
    Ok(())
}

pub async fn show(client: &Client, args: &ShowArgs) -> Result<()> {
    let id = ClothingId::from(args.id.as_str());
    let item = client.clothing_item(&id).await?;
    print_json(&item)?;
    match client.clothing_owner(&id).await {
        Ok(owner) => println!("{}: {}", "Owner".cyan(), owner.name),
        Err(e) => tracing::warn!(error = %e, "owner lookup failed"),
    }
    Ok(())
}

pub async fn upload(client: &Client, args: &UploadArgs) -> Result<()> {
    let image = ImageUpload::from_path(&args.path)
        .with_context(|| format!("cannot upload {}", args.path.display()))?;
    let item = client.upload_clothing(image).await?;
    print_success(&format!("Uploaded as {}", item.id.as_str().cyan()));
    print_json(&item)
}

pub async fn update(client: &Client, args: &UpdateArgs) -> Result<()> {
    let mut patch = UpdateClothingItem::new();
    if let Some(name) = &args.name {
        patch = patch.with_name(name);
    }
    if let Some(description) = &args.description {
        patch = patch.with_description(description);
    }
    if args.public || args.private {
        patch = patch.with_public(args.public);
    }
    anyhow::ensure!(
        !patch.is_empty(),
        "nothing to update: pass --name, --description, --public or --private"
    );

    let id = ClothingId::from(args.id.as_str());
    client.update_clothing(&id, &patch).await?;
    print_success(&format!("Updated {}", id.as_str().cyan()));
    Ok(())
}

pub async fn stylist(client: &Client) -> Result<()> {
    println!("{}", client.dashboard_stylist().await?.message);
    Ok(())
}

pub async fn ping(client: &Client) -> Result<()> {
    let pong = client.ping().await?;
    print_success(&format!("{} ({})", pong.message, client.api().base_url()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_left_saturates() {
        assert_eq!(seconds_left(1_700_000_060, 1_700_000_000), 60);
        assert_eq!(seconds_left(1, 1_700_000_000), 1 - 1_700_000_000);
        assert_eq!(seconds_left(i64::MIN, 1_700_000_000), i64::MIN);
        assert_eq!(seconds_left(i64::MAX, -5), i64::MAX);
    }
}
