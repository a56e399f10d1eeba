use std::collections::BTreeMap;

use anyhow::Context;
use clap::Parser;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::task::JoinSet;

/// Fire concurrent likes at a running server and tally the answers.
///
/// With `--clients 1` exactly one like should be accepted; with `--clients N` at most N.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://localhost:1111")]
    url: String,

    #[arg(long)]
    comment_id: i64,

    #[arg(long, default_value_t = 50)]
    requests: usize,

    /// Distinct user agents to spread the requests over
    #[arg(long, default_value_t = 1)]
    clients: usize,

    #[arg(long, default_value = "CF-Connecting-IP")]
    ip_header: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = Client::new();
    let like_url = format!("{}/api/comments/like", args.url);
    let count_url = format!("{}/api/comments/{}/likes", args.url, args.comment_id);

    let before = likes(&client, &count_url).await?;
    println!("Likes before: {before}");

    let mut tasks = JoinSet::new();
    for i in 0..args.requests {
        let client = client.clone();
        let like_url = like_url.clone();
        let ip_header = args.ip_header.clone();
        let user_agent = format!("tester-{}", i % args.clients.max(1));
        let body = json!({ "commentId": args.comment_id });

        tasks.spawn(async move {
            let response = client
                .post(&like_url)
                .header(ip_header.as_str(), "203.0.113.7")
                .header(reqwest::header::USER_AGENT, user_agent)
                .json(&body)
                .send()
                .await?;

            let json: Value = response.json().await?;
            Ok::<_, reqwest::Error>(match json["reason"].as_str() {
                Some(reason) => reason.to_string(),
                None => "Liked".to_string(),
            })
        });
    }

    let mut tally = BTreeMap::new();
    while let Some(result) = tasks.join_next().await {
        let outcome = result.context("Request task panicked")??;
        *tally.entry(outcome).or_insert(0usize) += 1;
    }

    for (outcome, count) in &tally {
        println!("{outcome}: {count}");
    }

    let after = likes(&client, &count_url).await?;
    let accepted = tally.get("Liked").copied().unwrap_or_default();
    println!("Likes after: {after} ({accepted} accepted)");

    if after != before + accepted as u64 {
        anyhow::bail!("Count went from {before} to {after} but {accepted} likes were accepted");
    }

    Ok(())
}

async fn likes(client: &Client, url: &str) -> anyhow::Result<u64> {
    let json: Value = client.get(url).send().await?.error_for_status()?.json().await?;

    json["likes"]
        .as_u64()
        .with_context(|| format!("No like count in {json}"))
}
