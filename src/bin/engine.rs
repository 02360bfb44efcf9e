use std::sync::Arc;

use dotenvy::dotenv;
use tokio::signal;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use warmup_engine::content_generator::fake::FakeContentGenerator;
use warmup_engine::content_generator::ContentGenerator;
use warmup_engine::day_advancer::DayAdvancer;
use warmup_engine::dispatcher::Dispatcher;
use warmup_engine::encryption::EncryptionService;
use warmup_engine::engagement::EngagementSimulator;
use warmup_engine::mail_client::fake::FakeMailClient;
use warmup_engine::mail_client::MailClient;
use warmup_engine::rand_source::{OsRandSource, RandSource};
use warmup_engine::reply_matcher::ReplyMatcher;
use warmup_engine::score::ScoreEngine;
use warmup_engine::spam_recovery::SpamRecovery;
use warmup_engine::{db, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let pool = db::connect(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    tracing::info!("warmup engine starting");

    let encryption = Arc::new(
        EncryptionService::from_config(&config)
            .map_err(|e| format!("credentials encryption not configured: {e}"))?,
    );

    // No concrete OAuth/IMAP/Gmail adapter or content generator ships with
    // this crate (both are out of scope); the in-memory stand-ins let the
    // worker run end to end against a real database until a provider
    // adapter is wired in at the composition root.
    let mail_client: Arc<dyn MailClient> = Arc::new(FakeMailClient::default());
    let content_generator: Arc<dyn ContentGenerator> = Arc::new(FakeContentGenerator);
    let rand: Arc<dyn RandSource> = Arc::new(OsRandSource);

    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        mail_client.clone(),
        content_generator.clone(),
        rand.clone(),
        encryption.clone(),
        config.clone(),
    ));
    let engagement = Arc::new(EngagementSimulator::new(
        pool.clone(),
        mail_client.clone(),
        rand.clone(),
        encryption.clone(),
        config.engagement.clone(),
    ));
    let reply_matcher = Arc::new(ReplyMatcher::new(
        pool.clone(),
        mail_client.clone(),
        encryption.clone(),
        chrono::Duration::from_std(config.intervals.reply_poll * 3).unwrap(),
    ));
    let spam_recovery = Arc::new(SpamRecovery::new(pool.clone(), mail_client.clone(), encryption.clone()));
    let day_advancer = Arc::new(DayAdvancer::new(
        pool.clone(),
        chrono::Duration::from_std(config.plan.retention).unwrap(),
    ));
    let score_engine = Arc::new(ScoreEngine::new(pool.clone(), config.score_window_days));

    let shutdown = CancellationToken::new();

    let mut handles = Vec::new();
    handles.push(spawn_loop("dispatcher", config.intervals.dispatch, shutdown.clone(), {
        let dispatcher = dispatcher.clone();
        move || {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.tick().await.map(|r| format!("{r:?}")) }
        }
    }));
    handles.push(spawn_loop("engagement", config.intervals.engagement, shutdown.clone(), {
        let engagement = engagement.clone();
        move || {
            let engagement = engagement.clone();
            async move { engagement.tick().await.map(|r| format!("{r:?}")) }
        }
    }));
    handles.push(spawn_loop("reply_matcher", config.intervals.reply_poll, shutdown.clone(), {
        let reply_matcher = reply_matcher.clone();
        move || {
            let reply_matcher = reply_matcher.clone();
            async move { reply_matcher.tick().await.map(|r| format!("{r:?}")) }
        }
    }));
    handles.push(spawn_loop(
        "spam_recovery",
        config.intervals.spam_recovery,
        shutdown.clone(),
        {
            let spam_recovery = spam_recovery.clone();
            move || {
                let spam_recovery = spam_recovery.clone();
                async move { spam_recovery.tick().await.map(|r| format!("{r:?}")) }
            }
        },
    ));
    handles.push(spawn_loop(
        "day_advancer",
        config.intervals.day_advance,
        shutdown.clone(),
        {
            let day_advancer = day_advancer.clone();
            move || {
                let day_advancer = day_advancer.clone();
                async move { day_advancer.tick().await.map(|r| format!("{r:?}")) }
            }
        },
    ));
    handles.push(spawn_loop("score", config.intervals.score, shutdown.clone(), {
        let score_engine = score_engine.clone();
        move || {
            let score_engine = score_engine.clone();
            async move { score_engine.tick().await.map(|r| format!("{r:?}")) }
        }
    }));

    signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining periodic loops");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("warmup engine stopped");
    Ok(())
}

/// Runs `tick` on `period`, stopping cleanly when `shutdown` fires. Each
/// component owns its own cadence (dispatch every two minutes, scoring
/// every six hours, ...) rather than sharing one coarse iteration counter.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: std::time::Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = warmup_engine::EngineResult<String>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match tick().await {
                        Ok(report) => tracing::debug!(component = name, report = %report, "tick complete"),
                        Err(e) => tracing::warn!(component = name, error = %e, "tick failed"),
                    }
                }
            }
        }
    })
}
