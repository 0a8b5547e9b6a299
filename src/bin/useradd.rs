use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use quantgate::services::user_store::hash_password;
use quantgate::server::models::User;

/// Provision or update gateway accounts in the users file. Request handlers
/// never write user records; this utility is the only writer.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Username to create or update
    username: Option<String>,

    /// Password; prompted for when omitted
    #[arg(short, long)]
    password: Option<String>,

    /// Users file path
    #[arg(short, long, default_value = "users.json", env = "QUANTGATE_USERS_FILE")]
    file: PathBuf,

    /// List existing usernames and exit
    #[arg(short, long)]
    list: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut users: Vec<User> = match std::fs::read_to_string(&cli.file) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("users file {} is not valid", cli.file.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e).context(format!("cannot read {}", cli.file.display())),
    };

    if cli.list {
        for user in &users {
            println!("{}", user.username);
        }
        return Ok(());
    }

    let username = cli
        .username
        .context("a username is required unless --list is given")?;
    if username.is_empty()
        || username.len() > 64
        || username.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        anyhow::bail!("usernames must be 1-64 printable characters without spaces");
    }

    let password = match cli.password {
        Some(password) => password,
        None => prompt_password(&username)?,
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let password_hash = hash_password(&password)?;
    match users.iter_mut().find(|u| u.username == username) {
        Some(user) => {
            user.password_hash = password_hash;
            println!("updated password for {username}");
        }
        None => {
            users.push(User {
                username: username.clone(),
                password_hash,
            });
            println!("created user {username}");
        }
    }

    write_users_file(&cli.file, &users)
}

fn prompt_password(username: &str) -> Result<String> {
    print!("password for {username}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Writes through a sibling temp file so a crash never truncates the
/// existing records.
fn write_users_file(path: &PathBuf, users: &[User]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, users)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}
