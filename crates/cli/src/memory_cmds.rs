//! Subcommand implementations for the `engram` CLI surface: `stats`,
//! `search`, `profile`, `entities`, `extract`, `questions`, `identity`.
//! Plain-text reports with box-drawing section headers and `- key: value`
//! bullet lines.

use anyhow::Result;
use engram_memory::Orchestrator;

pub(crate) async fn run_stats(orchestrator: &Orchestrator) -> Result<()> {
    let stats = orchestrator.stats().await;

    println!("── engram memory stats ──────────────────────────────");
    println!("- active items     : {}", stats.total_active);
    println!("- superseded items  : {}", stats.total_superseded);
    println!("- archived items    : {}", stats.total_archived);
    println!("- extraction count  : {}", stats.extraction_count);

    if stats.by_category.is_empty() {
        println!("- by category       : (none)");
    } else {
        println!("- by category:");
        let mut categories: Vec<_> = stats.by_category.iter().collect();
        categories.sort_by(|a, b| a.0.cmp(b.0));
        for (category, count) in categories {
            println!("    {category:<14} {count}");
        }
    }

    if stats.open_box_topics.is_empty() {
        println!("- open box          : (none)");
    } else {
        println!(
            "- open box          : {} memories, topics: {}",
            stats.open_box_memory_count,
            stats.open_box_topics.join(", ")
        );
    }

    Ok(())
}

pub(crate) async fn run_search(orchestrator: &Orchestrator, query: &str, n: usize) -> Result<()> {
    let outcome = orchestrator.recall(query, None, n).await;

    if outcome.items.is_empty() && outcome.verbatim.is_empty() {
        println!("no memories matched {query:?}");
        return Ok(());
    }

    println!("── search: {query:?} ─────────────────────────────────");
    for (rank, item) in outcome.items.iter().enumerate() {
        println!(
            "{:>2}. [{}] ({:.2}, {:?}) {}",
            rank + 1,
            item.category.slug(),
            item.confidence,
            item.confidence_tier(),
            engram_memory::truncate_str(&item.content, 160),
        );
        if !item.tags.is_empty() {
            println!("      tags: {}", item.tags.join(", "));
        }
    }

    if !outcome.verbatim.is_empty() {
        println!("── verbatim artifacts ────────────────────────────────");
        for artifact in &outcome.verbatim {
            println!("  \"{}\" (source: {})", artifact.quote, artifact.source_item_id);
        }
    }

    Ok(())
}

pub(crate) async fn run_profile(orchestrator: &Orchestrator) -> Result<()> {
    let body = orchestrator.profile_document().await?;
    print!("{body}");
    Ok(())
}

pub(crate) async fn run_identity(orchestrator: &Orchestrator) -> Result<()> {
    let body = orchestrator.identity_document().await?;
    print!("{body}");
    Ok(())
}

pub(crate) async fn run_entities(orchestrator: &Orchestrator) -> Result<()> {
    let entities = orchestrator.entities().await?;

    if entities.is_empty() {
        println!("no entities recorded yet");
        return Ok(());
    }

    println!("── entities ──────────────────────────────────────────");
    for entity in &entities {
        println!("{} ({:?})", entity.name, entity.entity_type);
        for fact in &entity.facts {
            println!("  - {fact}");
        }
    }

    Ok(())
}

pub(crate) async fn run_extract(orchestrator: &Orchestrator) -> Result<()> {
    println!("forcing extraction on the buffered window...");
    orchestrator.force_extract().await;
    orchestrator.wait_for_extraction_idle().await;

    let stats = orchestrator.stats().await;
    println!("extraction complete; {} active items on file", stats.total_active);
    Ok(())
}

pub(crate) async fn run_questions(orchestrator: &Orchestrator, all: bool) -> Result<()> {
    let questions = orchestrator.questions(!all).await?;

    if questions.is_empty() {
        println!(
            "no {}questions",
            if all { "" } else { "unresolved " }
        );
        return Ok(());
    }

    println!("── questions ─────────────────────────────────────────");
    for question in &questions {
        let resolved = if question.resolved { "resolved" } else { "open" };
        println!("[{resolved}, priority {:.2}] {}", question.priority, question.question);
        if !question.context.is_empty() {
            println!("    context: {}", question.context);
        }
    }

    Ok(())
}
