use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mindocean_api::config::AppConfig;
use mindocean_api::{db, FileSettingsStore, Forum, UserDirectory};

fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mindocean_api=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("reading configuration")?;

    let pool = db::open_pool(&config.database.url, config.database.max_connections)
        .with_context(|| format!("opening database {}", config.database.url))?;
    db::run_migrations(&pool).context("running migrations")?;

    let forum = Forum::new(pool.clone());
    let users = UserDirectory::new(pool);
    let settings = FileSettingsStore::new(&config.settings.dir, config.default_models.clone())
        .context("preparing settings directory")?;

    let categories = forum.list_categories()?;
    info!(
        database = %config.database.url,
        pool_size = config.database.max_connections,
        categories = categories.len(),
        users = users.user_count()?,
        settings_users = settings.list_users()?.len(),
        builtin_model = config.default_models.builtin_free.is_some(),
        "mindocean store ready"
    );

    Ok(())
}
