use std::{fmt::Write, path::Path, sync::Arc};

use ansi_term::Style;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::Parser;

use crate::{
    recommend::{scorer::Recommendations, ArchiveOutcome, Recommender},
    service::SESSION_FILE,
    store::open_store,
    sync::session::SessionStore,
    utils::{
        clock::{Clock, DefaultClock},
        config::Config,
    },
};

#[derive(Debug, Parser)]
pub struct RecommendCommand {
    #[arg(long, help = "Print the raw result as JSON")]
    json: bool,
    #[arg(long, help = "Disable bold headers")]
    plain: bool,
}

/// Command to process `recommend`. Shows the tabs worth going back to, then the archived ones.
pub async fn process_recommend_command(
    RecommendCommand { json, plain }: RecommendCommand,
    config: &Config,
    dir: &Path,
) -> Result<()> {
    let recommender = create_recommender(config, dir).await?;
    let Some(recommendations) = recommender.try_recommend().await? else {
        println!("Not signed in. Run `tabtrail login` first.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&recommendations)?);
    } else {
        print!("{}", render(&recommendations, DefaultClock.time(), !plain));
    }
    Ok(())
}

pub async fn process_archive_command(url: &str, config: &Config, dir: &Path) -> Result<()> {
    let recommender = create_recommender(config, dir).await?;
    match recommender.archive(url).await? {
        ArchiveOutcome::Archived => println!("Archived {url}"),
        ArchiveOutcome::NoCredential => println!("Not signed in. Run `tabtrail login` first."),
    }
    Ok(())
}

async fn create_recommender(config: &Config, dir: &Path) -> Result<Recommender> {
    let store = open_store(&config.store, dir, DefaultClock)?;
    let session = SessionStore::load(dir.join(SESSION_FILE)).await?;
    Ok(Recommender::new(
        store,
        Arc::new(session),
        Box::new(DefaultClock),
        config.lookback(),
    ))
}

fn render(recommendations: &Recommendations, now: DateTime<Utc>, styled: bool) -> String {
    let header = |v: &str| {
        if styled {
            Style::new().bold().paint(v).to_string()
        } else {
            v.to_string()
        }
    };

    let mut out = String::new();
    // Writing into a String can't fail.
    let _ = writeln!(out, "{}", header("Recommended"));
    if recommendations.recommendations.is_empty() {
        let _ = writeln!(out, "Nothing to recommend yet");
    }
    for entry in &recommendations.recommendations {
        let _ = writeln!(
            out,
            "{:.2}\t{}\t{}\t{}",
            entry.score.total,
            format_age(now - entry.row.last_visited_at),
            entry.row.domain,
            display_title(&entry.row.title, &entry.row.url),
        );
    }

    if !recommendations.archived.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", header("Archived"));
        for row in &recommendations.archived {
            let age = row
                .archived_at
                .map(|v| format_age(now - v))
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(out, "{age}\t{}\t{}", row.domain, row.url);
        }
    }
    out
}

fn display_title<'a>(title: &'a str, url: &'a str) -> &'a str {
    if title.trim().is_empty() {
        url
    } else {
        title
    }
}

fn format_age(v: Duration) -> String {
    if v.num_days() > 0 {
        format!("{}d{}h ago", v.num_days(), v.num_hours() % 24)
    } else if v.num_hours() > 0 {
        format!("{}h{}m ago", v.num_hours(), v.num_minutes() % 60)
    } else if v.num_minutes() > 0 {
        format!("{}m ago", v.num_minutes())
    } else {
        "just now".into()
    }
}
