use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use newsportal::config::Config;
use newsportal::limiter::RateLimiter;
use newsportal::notify::mailer::build_dispatcher;
use newsportal::notify::{NotificationOutcome, Notifier};
use newsportal::publish::{PostService, PublishError};
use newsportal::storage::{
    parse_flat_categories, Database, DatabaseError, NewPost, Post, PostFilter, PostKind,
};
use newsportal::store::ContentStore;
use newsportal::util::{parse_site_url, post_url};

/// Get the config directory path (~/.config/newsportal/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsportal"))
}

#[derive(Parser, Debug)]
#[command(name = "newsportal", about = "News portal with category subscriptions and email digests")]
struct Cli {
    /// Config file (defaults to ~/.config/newsportal/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file (defaults to ~/.config/newsportal/portal.db)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Rebuild the full-text search index before running the command
    #[arg(long, global = true)]
    rebuild_search: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(subcommand)]
    Author(AuthorCommand),
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Subscribe an author to a category
    Subscribe(SubscriptionArgs),
    Unsubscribe(SubscriptionArgs),
    #[command(subcommand)]
    Post(PostCommand),
    #[command(subcommand)]
    Comment(CommentCommand),
    /// Full-text search over titles and texts
    Search {
        query: String,
        #[arg(long)]
        category: Option<String>,
    },
    /// List posts ordered by title, ten per page
    List(ListArgs),
    /// Recompute an author's rating
    Rating { author: i64 },
}

#[derive(Subcommand, Debug)]
enum AuthorCommand {
    Add { name: String, email: String },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Add { name: String },
    List,
    Rename { name: String, new_name: String },
    Delete { name: String },
}

#[derive(Args, Debug)]
struct SubscriptionArgs {
    #[arg(long)]
    author: i64,
    category: String,
}

#[derive(Subcommand, Debug)]
enum PostCommand {
    Create {
        #[arg(long)]
        author: i64,
        /// news or article
        #[arg(long, default_value = "news")]
        kind: PostKind,
        #[arg(long)]
        title: String,
        #[arg(long)]
        text: String,
        /// Comma-separated category names
        #[arg(long, default_value = "")]
        categories: String,
    },
    Show { id: i64 },
    Like { id: i64 },
    Dislike { id: i64 },
    Edit {
        id: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        text: String,
    },
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
enum CommentCommand {
    Add {
        #[arg(long)]
        post: i64,
        #[arg(long)]
        author: i64,
        text: String,
    },
    Like { id: i64 },
    Dislike { id: i64 },
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Title contains (case-insensitive)
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    rating_above: Option<i64>,
    #[arg(long)]
    rating_below: Option<i64>,
    /// Created on or after this date (YYYY-MM-DD, UTC)
    #[arg(long)]
    since: Option<NaiveDate>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        eprintln!("Created config directory: {}", config_dir.display());
    }

    // User-only access: the database holds subscriber addresses
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let db_path = cli.db.clone().unwrap_or_else(|| config_dir.join("portal.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::Locked) => {
            eprintln!("Error: {}", DatabaseError::Locked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if cli.rebuild_search {
        let count = db
            .rebuild_search_index()
            .await
            .context("Failed to rebuild search index")?;
        tracing::info!(posts = count, "Search index rebuilt");
        eprintln!("Search index rebuilt: {} posts indexed", count);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    run(cli.command, &db, &config, &cancel).await
}

async fn run(
    command: Command,
    db: &Database,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Author(AuthorCommand::Add { name, email }) => {
            let id = db.create_author(&name, &email).await?;
            println!("Author {} created", id);
        }

        Command::Category(cmd) => run_category(cmd, db).await?,

        Command::Subscribe(args) => {
            let category = require_category(db, &args.category).await?;
            if db.subscribe(category.id, args.author).await? {
                println!("Subscribed to {}", category.name);
            } else {
                println!("Already subscribed to {}", category.name);
            }
        }
        Command::Unsubscribe(args) => {
            let category = require_category(db, &args.category).await?;
            if db.unsubscribe(category.id, args.author).await? {
                println!("Unsubscribed from {}", category.name);
            } else {
                println!("Was not subscribed to {}", category.name);
            }
        }

        Command::Post(cmd) => run_post(cmd, db, config, cancel).await?,

        Command::Comment(CommentCommand::Add { post, author, text }) => {
            let id = db.add_comment(post, author, &text).await?;
            println!("Comment {} added", id);
        }
        Command::Comment(CommentCommand::Like { id }) => {
            println!("Comment {} rating: {}", id, db.like_comment(id).await?);
        }
        Command::Comment(CommentCommand::Dislike { id }) => {
            println!("Comment {} rating: {}", id, db.dislike_comment(id).await?);
        }

        Command::Search { query, category } => {
            let category_id = match category {
                Some(name) => Some(require_category(db, &name).await?.id),
                None => None,
            };
            let posts = db.search_posts(&query, category_id).await?;
            if posts.is_empty() {
                println!("No posts match '{}'", query);
            }
            for post in &posts {
                print_post_line(post);
            }
        }

        Command::List(args) => {
            let category_id = match &args.category {
                Some(name) => Some(require_category(db, name).await?.id),
                None => None,
            };
            let created_since = args
                .since
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp());
            let filter = PostFilter {
                title_contains: args.title,
                rating_above: args.rating_above,
                rating_below: args.rating_below,
                created_since,
                category_id,
            };
            for post in &db.list_posts(&filter, args.page).await? {
                print_post_line(post);
            }
        }

        Command::Rating { author } => {
            let rating = db.update_author_rating(author).await?;
            println!("Author {} rating: {}", author, rating);
        }
    }
    Ok(())
}

async fn run_category(cmd: CategoryCommand, db: &Database) -> Result<()> {
    match cmd {
        CategoryCommand::Add { name } => {
            let id = db.create_category(&name).await?;
            println!("Category {} created", id);
        }
        CategoryCommand::List => {
            for category in db.list_categories().await? {
                println!("{:>4}  {}", category.id, category.name);
            }
        }
        CategoryCommand::Rename { name, new_name } => {
            let category = require_category(db, &name).await?;
            db.rename_category(category.id, &new_name).await?;
            println!("Renamed {} to {}", name, new_name);
        }
        CategoryCommand::Delete { name } => {
            let category = require_category(db, &name).await?;
            db.delete_category(category.id).await?;
            println!("Deleted {}", name);
        }
    }
    Ok(())
}

async fn run_post(
    cmd: PostCommand,
    db: &Database,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    match cmd {
        PostCommand::Create {
            author,
            kind,
            title,
            text,
            categories,
        } => {
            let author = db
                .get_author(author)
                .await?
                .with_context(|| format!("Author {} not found", author))?;
            let category_ids = db
                .resolve_category_names(&parse_flat_categories(&categories))
                .await?;

            let service = post_service(db, config)?;
            let new_post = NewPost {
                kind,
                title,
                text,
                category_ids,
            };
            match service.publish(&author, new_post, cancel).await {
                Ok(published) => {
                    println!("{} {} created", published.post.kind, published.post.id);
                    report_notification(&published.notification);
                }
                Err(PublishError::RateLimited(reason)) => bail!("Post refused: {}", reason),
                Err(e) => return Err(e.into()),
            }
        }
        PostCommand::Show { id } => {
            let post = db
                .get_post(id)
                .await?
                .with_context(|| format!("Post {} not found", id))?;
            let categories = ContentStore::categories_for_post(db, id).await?;
            let base = parse_site_url(&config.site_url)?;

            print_post_line(&post);
            let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
            println!("Categories: {}", names.join(", "));
            println!("Link: {}", post_url(&base, post.kind, post.id)?);
            println!();
            println!("{}", post.text);
            for comment in db.comments_for_post(id).await? {
                println!(
                    "  [{}] author {} ({:+}): {}",
                    comment.id, comment.author_id, comment.rating, comment.text
                );
            }
        }
        PostCommand::Like { id } => println!("Post {} rating: {}", id, db.like_post(id).await?),
        PostCommand::Dislike { id } => {
            println!("Post {} rating: {}", id, db.dislike_post(id).await?)
        }
        PostCommand::Edit { id, title, text } => {
            let service = post_service(db, config)?;
            let (post, outcome) = service.edit_post(id, &title, &text, cancel).await?;
            println!("Post {} updated: \"{}\"", post.id, post.title);
            report_notification(&outcome);
        }
        PostCommand::Delete { id } => {
            let service = post_service(db, config)?;
            match service.delete_post(id, cancel).await? {
                Some((post, outcome)) => {
                    println!("Deleted \"{}\"", post.title);
                    report_notification(&outcome);
                }
                None => bail!("Post {} not found", id),
            }
        }
    }
    Ok(())
}

fn post_service(db: &Database, config: &Config) -> Result<PostService> {
    let store: Arc<dyn ContentStore> = Arc::new(db.clone());
    let mailer = build_dispatcher(&config.mail).context("Failed to set up mail backend")?;
    let limiter = RateLimiter::new(store.clone(), &config.rate_limit);
    let notifier = Notifier::new(store, mailer, config)?;
    Ok(PostService::new(db.clone(), limiter, Arc::new(notifier)))
}

async fn require_category(db: &Database, name: &str) -> Result<newsportal::storage::Category> {
    db.get_category_by_name(name)
        .await?
        .with_context(|| format!("Unknown category '{}'", name))
}

fn report_notification(outcome: &NotificationOutcome) {
    match outcome {
        NotificationOutcome::Sent(count) => println!("Notified {} recipient(s)", count),
        NotificationOutcome::Skipped(reason) => println!("No notification sent ({:?})", reason),
        NotificationOutcome::Failed(e) => eprintln!("Warning: notification failed: {}", e),
    }
}

fn print_post_line(post: &Post) {
    let date = DateTime::from_timestamp(post.created_at, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "{:>5}  {:<7}  {}  {:>+4}  {}",
        post.id,
        post.kind.to_string(),
        date,
        post.rating,
        post.title
    );
}
