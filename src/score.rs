use sqlx::PgPool;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::models::Mailbox;
use crate::phase::phase_for;

const BUSINESS_DAY_WINDOW: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub open_rate: f64,
    pub reply_rate: f64,
    pub spam_rate: f64,
    pub recovery_rate: f64,
    pub phase_actual: f64,
    pub phase_target: i32,
    pub s_open: f64,
    pub s_reply: f64,
    pub s_phase: f64,
    pub s_spam: f64,
    pub score: f64,
}

impl ScoreBreakdown {
    pub fn grade(&self) -> &'static str {
        grade_for(self.score)
    }

    pub fn status_line(&self) -> String {
        format!(
            "score {:.1} ({}) — open {:.0}%, reply {:.0}%, spam {:.0}%, phase on-track {}",
            self.score,
            self.grade(),
            self.open_rate * 100.0,
            self.reply_rate * 100.0,
            self.spam_rate * 100.0,
            self.phase_actual >= 0.9 * self.phase_target as f64,
        )
    }
}

fn grade_for(score: f64) -> &'static str {
    if score >= 90.0 {
        "A+"
    } else if score >= 80.0 {
        "A"
    } else if score >= 70.0 {
        "B"
    } else if score >= 60.0 {
        "C"
    } else if score >= 50.0 {
        "D"
    } else {
        "F"
    }
}

fn s_open(open_rate: f64) -> f64 {
    if open_rate >= 0.6 {
        100.0
    } else if open_rate >= 0.4 {
        80.0
    } else if open_rate >= 0.2 {
        60.0
    } else {
        (open_rate / 0.2) * 60.0
    }
}

fn s_reply(reply_rate: f64) -> f64 {
    if reply_rate >= 0.25 {
        100.0
    } else if reply_rate >= 0.15 {
        85.0
    } else if reply_rate >= 0.05 {
        70.0
    } else {
        (reply_rate / 0.05) * 70.0
    }
}

fn s_phase(phase: u8, phase_actual: f64, phase_target: i32) -> f64 {
    let base = match phase {
        1 => 50.0,
        2 => 65.0,
        3 => 80.0,
        4 => 90.0,
        _ => 100.0,
    };
    let mut value = base;
    if phase_target > 0 {
        if phase_actual >= 0.9 * phase_target as f64 {
            value += 10.0;
        } else if phase_actual < 0.5 * phase_target as f64 {
            value -= 15.0;
        }
    }
    value.clamp(0.0, 100.0)
}

fn s_spam(spam_rate: f64, recovery_rate: f64, had_spam: bool) -> f64 {
    let mut value = if spam_rate <= 0.02 {
        100.0
    } else if spam_rate <= 0.05 {
        85.0
    } else if spam_rate <= 0.10 {
        60.0
    } else {
        (100.0 - spam_rate * 100.0 * 8.0).max(0.0)
    };
    if had_spam {
        if recovery_rate >= 0.8 {
            value += 10.0;
        } else if recovery_rate < 0.5 {
            value -= 10.0;
        }
    }
    value.clamp(0.0, 100.0)
}

pub fn compute_breakdown(
    sent: i64,
    opened: i64,
    replied: i64,
    spam_detected: i64,
    recovered: i64,
    warmup_day: i32,
    daily_limit: i32,
    recent_sent_last_7_business_days: i64,
) -> ScoreBreakdown {
    let open_rate = safe_rate(opened, sent);
    let reply_rate = safe_rate(replied, sent);
    let spam_rate = safe_rate(spam_detected, sent);
    let recovery_rate = if spam_detected > 0 {
        recovered as f64 / spam_detected as f64
    } else {
        1.0
    };
    let phase_actual = recent_sent_last_7_business_days as f64 / BUSINESS_DAY_WINDOW as f64;
    let phase = phase_for(warmup_day, daily_limit.max(1)).phase;

    let so = s_open(open_rate);
    let sr = s_reply(reply_rate);
    let sp = s_phase(phase, phase_actual, daily_limit);
    let ss = s_spam(spam_rate, recovery_rate, spam_detected > 0);

    let raw = 0.40 * so + 0.30 * sr + 0.20 * sp + 0.10 * ss;
    let score = (raw.clamp(0.0, 100.0) * 10.0).round() / 10.0;

    ScoreBreakdown {
        open_rate,
        reply_rate,
        spam_rate,
        recovery_rate,
        phase_actual,
        phase_target: daily_limit,
        s_open: so,
        s_reply: sr,
        s_phase: sp,
        s_spam: ss,
        score,
    }
}

fn safe_rate(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Periodic loop (spec cadence ~6h): recomputes and persists `score` for
/// every active SENDER from the last `window_days` calendar days of its
/// Messages and SpamEvents (`SCORE_WINDOW_DAYS`, default 30).
pub struct ScoreEngine {
    pool: Arc<PgPool>,
    window_days: i64,
}

#[derive(Debug, Default)]
pub struct ScoreReport {
    pub scored: u32,
}

impl ScoreEngine {
    pub fn new(pool: Arc<PgPool>, window_days: i64) -> Self {
        Self { pool, window_days }
    }

    pub async fn tick(&self) -> EngineResult<ScoreReport> {
        let mut report = ScoreReport::default();
        let senders = self.active_senders().await?;

        for sender in senders {
            let stats = self.fetch_stats(sender.id).await?;
            let breakdown = compute_breakdown(
                stats.sent,
                stats.opened,
                stats.replied,
                stats.spam_detected,
                stats.recovered,
                sender.warmup_day,
                sender.daily_limit,
                stats.recent_sent_last_7_business_days,
            );

            sqlx::query("UPDATE mailboxes SET score = $2, updated_at = NOW() WHERE id = $1")
                .bind(sender.id)
                .bind(breakdown.score)
                .execute(self.pool.as_ref())
                .await?;

            tracing::info!(
                mailbox_id = sender.id,
                score = breakdown.score,
                grade = breakdown.grade(),
                "reputation score updated"
            );
            report.scored += 1;
        }

        Ok(report)
    }

    async fn fetch_stats(&self, sender_id: i64) -> EngineResult<SenderStats> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)::bigint,
                COUNT(opened_at)::bigint,
                COUNT(replied_at)::bigint
            FROM messages
            WHERE sender_id = $1 AND sent_at >= NOW() - ($2 || ' days')::interval
            "#,
        )
        .bind(sender_id)
        .bind(self.window_days)
        .fetch_one(self.pool.as_ref())
        .await?;
        let (sent, opened, replied) = row;

        let (spam_detected, recovered): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)::bigint,
                COUNT(recovered_at)::bigint
            FROM spam_events
            WHERE sender_id = $1 AND detected_at >= NOW() - ($2 || ' days')::interval
            "#,
        )
        .bind(sender_id)
        .bind(self.window_days)
        .fetch_one(self.pool.as_ref())
        .await?;

        let recent_sent_last_7_business_days: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)::bigint FROM messages
            WHERE sender_id = $1
              AND sent_at >= NOW() - INTERVAL '7 days'
              AND EXTRACT(ISODOW FROM sent_at) < 6
            "#,
        )
        .bind(sender_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(SenderStats {
            sent,
            opened,
            replied,
            spam_detected,
            recovered,
            recent_sent_last_7_business_days,
        })
    }

    async fn active_senders(&self) -> EngineResult<Vec<Mailbox>> {
        let rows = sqlx::query_as::<_, Mailbox>(
            r#"
            SELECT id, email, provider, role, credentials_enc, credentials_key_id, active, tz, target,
                   warmup_day, daily_limit, open_rate_target, reply_rate_target, score,
                   needs_reauth, last_advance_date, created_at, updated_at
            FROM mailboxes WHERE active = TRUE AND role = 'SENDER'
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(rows)
    }
}

struct SenderStats {
    sent: i64,
    opened: i64,
    replied: i64,
    spam_detected: i64,
    recovered: i64,
    recent_sent_last_7_business_days: i64,
}
