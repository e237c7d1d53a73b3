#![deny(warnings)]

use persistence::default_sqlite_url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .skip_while(|a| a != "--db")
        .nth(1)
        .unwrap_or_else(|| default_sqlite_url().to_string());
    let pool = persistence::init_db(&url).await?;
    let mut conn = pool.acquire().await?;
    let spaces = persistence::vessels::list_spaces(&mut conn).await?;
    println!("DB migrated at {} ({} spaces with vessels)", url, spaces.len());
    Ok(())
}
