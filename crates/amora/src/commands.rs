//! Subcommand handlers. Each one is a thin caller of [`AmoraClient`].

use amora_sync::{
    AmoraClient, EnrichedMatch, Freshness, Gender, Message, Preferences, Registration, Resolved,
    Revalidation, User,
};
use miette::Result;

pub struct PreferencesChange {
    pub min_age: Option<u8>,
    pub max_age: Option<u8>,
    pub max_distance: Option<u32>,
    pub gender: Option<String>,
}

/// Parse a `key=value` pair.
pub fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("invalid field '{}', expected key=value", s)),
    }
}

pub fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    eprint!("Password: ");
    rpassword::read_password().map_err(|e| miette::miette!("failed to read password: {}", e))
}

pub async fn login(client: &AmoraClient, email: &str, password: &str) -> Result<()> {
    let outcome = client
        .sessions()
        .login(email, password)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Logged in as {}.", describe(&outcome.session.identity));
    Ok(())
}

pub async fn signup(client: &AmoraClient, registration: &Registration) -> Result<()> {
    let receipt = client
        .sessions()
        .signup(registration)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    match receipt.id {
        Some(id) => println!("Registered account {id}. Log in to continue."),
        None => println!("Registered. Log in to continue."),
    }
    Ok(())
}

pub async fn whoami(client: &AmoraClient) -> Result<()> {
    match client.sessions().user_info().await {
        Some(user) => {
            println!("{}", describe(&user));
            if let Some(role) = &user.role {
                println!("role: {role}");
            }
        }
        None => println!("Not logged in."),
    }
    Ok(())
}

pub async fn profile(client: &AmoraClient, refresh: bool) -> Result<()> {
    let user = current_user(client).await?;
    let resources = client.resources();

    let resolved = if refresh {
        resources.refresh_profile(user.id).await
    } else {
        settle(resources.profile(user.id).await, |p| print_json(p)).await
    };
    let resolved = resolved.map_err(|e| miette::miette!("{}", e))?;

    note_freshness(&resolved);
    print_json(&resolved.value);
    Ok(())
}

pub async fn show_preferences(client: &AmoraClient, refresh: bool) -> Result<()> {
    let user = current_user(client).await?;
    let resources = client.resources();

    let resolved = if refresh {
        resources.refresh_preferences(user.id).await
    } else {
        settle(resources.preferences(user.id).await, print_preferences).await
    };
    let resolved = resolved.map_err(|e| miette::miette!("{}", e))?;

    note_freshness(&resolved);
    print_preferences(&resolved.value);
    Ok(())
}

pub async fn set_preferences(client: &AmoraClient, change: PreferencesChange) -> Result<()> {
    let user = current_user(client).await?;
    let resources = client.resources();

    // Start from the server copy so unset options are preserved.
    let mut preferences = resources
        .refresh_preferences(user.id)
        .await
        .map_err(|e| miette::miette!("{}", e))?
        .into_value();

    let min = change.min_age.unwrap_or(preferences.min_age_range);
    let max = change.max_age.unwrap_or(preferences.max_age_range);
    preferences
        .set_age_range(min, max)
        .map_err(|e| miette::miette!("{}", e))?;
    if let Some(km) = change.max_distance {
        preferences
            .set_max_distance(km)
            .map_err(|e| miette::miette!("{}", e))?;
    }
    if let Some(gender) = change.gender {
        let gender: Gender = gender.parse().map_err(|e| miette::miette!("{}", e))?;
        preferences.favorite_gender = Some(gender);
    }

    let confirmed = resources
        .update_preferences(user.id, &preferences)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Preferences saved.");
    print_preferences(&confirmed);
    Ok(())
}

pub async fn matches(client: &AmoraClient, refresh: bool) -> Result<()> {
    let user = current_user(client).await?;
    let resources = client.resources();

    let resolved = if refresh {
        resources.refresh_matches(user.id).await
    } else {
        settle(resources.matches(user.id).await, |m| print_matches(m)).await
    };
    let resolved = resolved.map_err(|e| miette::miette!("{}", e))?;

    note_freshness(&resolved);
    print_matches(&resolved.value);
    Ok(())
}

pub async fn thread(client: &AmoraClient, match_id: i64, open: bool) -> Result<()> {
    let threads = client.threads();

    let load = if open {
        let user = current_user(client).await?;
        threads.open_thread(match_id, user.id).await
    } else {
        threads.thread(match_id).await
    };
    let resolved = settle(load, |m| print_thread(m)).await;
    let resolved = resolved.map_err(|e| miette::miette!("{}", e))?;

    note_freshness(&resolved);
    print_thread(&resolved.value);
    Ok(())
}

pub async fn send(client: &AmoraClient, match_id: i64, content: &str) -> Result<()> {
    let user = current_user(client).await?;

    let record = client
        .resources()
        .match_details(match_id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let receiver = record.counterpart_of(user.id);

    let message = client
        .threads()
        .send(match_id, content, user.id, receiver)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Sent message {}.", message.id);
    Ok(())
}

pub async fn mark_read(client: &AmoraClient, message_ids: &[i64]) -> Result<()> {
    let report = client
        .threads()
        .mark_read(message_ids)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Marked {} message(s) as read.", report.marked.len());
    if !report.is_complete() {
        eprintln!("Could not mark: {:?}", report.failed);
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

async fn current_user(client: &AmoraClient) -> Result<User> {
    client
        .sessions()
        .user_info()
        .await
        .ok_or_else(|| miette::miette!("not logged in; run `amora login` first"))
}

/// Show the cached value, if any, then wait for the refresh.
async fn settle<T>(
    mut load: Revalidation<'_, T>,
    show: impl Fn(&T),
) -> Result<Resolved<T>, amora_sync::SyncError> {
    if let Some(cached) = load.take_cached() {
        eprintln!("(cached)");
        show(&cached);
        eprintln!("(refreshing...)");
    }
    load.settle().await
}

fn note_freshness<T>(resolved: &Resolved<T>) {
    if let Freshness::Stale { reason } = &resolved.freshness {
        eprintln!("(offline, showing cached data: {reason})");
    }
}

fn describe(user: &User) -> String {
    let name = user
        .display_name()
        .unwrap_or_else(|| format!("user {}", user.id));
    match &user.email {
        Some(email) => format!("{name} <{email}> (id {})", user.id),
        None => format!("{name} (id {})", user.id),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to format output: {e}"),
    }
}

fn print_preferences(preferences: &Preferences) {
    let gender = preferences
        .favorite_gender
        .map(|g| g.to_string())
        .unwrap_or_else(|| "any".to_string());
    let distance = preferences
        .max_distance
        .map(|km| format!("{km} km"))
        .unwrap_or_else(|| "unlimited".to_string());

    println!("gender:   {gender}");
    println!("ages:     {}-{}", preferences.min_age_range, preferences.max_age_range);
    println!("distance: {distance}");
}

fn print_matches(matches: &[EnrichedMatch]) {
    if matches.is_empty() {
        println!("No matches yet.");
        return;
    }

    for m in matches {
        let name = match (&m.name, &m.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => format!("user {}", m.counterpart_id),
        };
        let last = m
            .last_message
            .as_ref()
            .map(|msg| msg.content.as_str())
            .unwrap_or("(no messages yet)");
        let unread = if m.unread_count > 0 {
            format!(" [{} unread]", m.unread_count)
        } else {
            String::new()
        };
        println!("#{:<6} {name}{unread}: {last}", m.record.id);
    }
}

fn print_thread(messages: &[Message]) {
    if messages.is_empty() {
        println!("No messages.");
        return;
    }

    for message in messages {
        let when = message
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let marker = if message.is_read { ' ' } else { '*' };
        println!(
            "{marker} {when:<16} {:>6} -> {:<6} {}",
            message.sender_user_id, message.receiver_user_id, message.content
        );
    }
}
