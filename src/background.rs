//! 后台任务：过期令牌与陈旧限流窗口的周期清理。

use std::sync::Arc;
use std::time::Duration;

use crate::config::GATE_PRUNE_INTERVAL_SECS;
use crate::gate::{Gate, prune_expired_tokens, prune_rate_windows};

/// 启动闸门状态的周期清理任务。
pub fn spawn_background_tasks(gate: Arc<Gate>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(GATE_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            prune_expired_tokens(&gate).await;
            prune_rate_windows(&gate).await;
        }
    });
}
