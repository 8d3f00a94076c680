//! Prints a bearer token for a user id, signed with `JWT_SECRET`.
//!
//! Usage: `issue_token <user_id> [ttl_secs]`

use anyhow::{bail, Context};
use dotenv::dotenv;

use syncsnap::auth::jwt;

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let mut args = std::env::args().skip(1);
    let Some(user_id) = args.next() else {
        bail!("usage: issue_token <user_id> [ttl_secs]");
    };
    let user_id: i32 = user_id.parse().context("user_id must be an integer")?;
    let ttl: usize = match args.next() {
        Some(raw) => raw.parse().context("ttl_secs must be a positive integer")?,
        None => 3600,
    };

    let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    let issued = jwt::generate_token(user_id.to_string(), None, ttl, &secret)?;
    println!("{}", issued.token);
    eprintln!("expires in {}s", issued.expires_in);
    Ok(())
}
