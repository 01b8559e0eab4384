//! # Prometheus 指标收集模块
//!
//! 为信令网关与推送分发提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 信令网关指标
pub struct SignalingGatewayMetrics {
    /// 当前存活连接数
    pub connections_active: IntGauge,
    /// 入站事件总数（按事件名）
    pub inbound_events_total: IntCounterVec,
    /// 丢弃的畸形事件数
    pub malformed_events_total: IntCounter,
    /// 通话记录终态（按结果）
    pub call_outcomes_total: IntCounterVec,
    /// 中继投递次数（按投递路径：room / user / push）
    pub relay_deliveries_total: IntCounterVec,
}

impl SignalingGatewayMetrics {
    pub fn new() -> Self {
        let connections_active = IntGauge::new(
            "signaling_connections_active",
            "Number of live signaling connections",
        )
        .expect("Failed to create signaling_connections_active metric");

        let inbound_events_total = IntCounterVec::new(
            Opts::new(
                "signaling_inbound_events_total",
                "Total number of inbound client events",
            ),
            &["event"],
        )
        .expect("Failed to create signaling_inbound_events_total metric");

        let malformed_events_total = IntCounter::new(
            "signaling_malformed_events_total",
            "Total number of dropped malformed client frames",
        )
        .expect("Failed to create signaling_malformed_events_total metric");

        let call_outcomes_total = IntCounterVec::new(
            Opts::new(
                "signaling_call_outcomes_total",
                "Total number of call records by status transition",
            ),
            &["status"],
        )
        .expect("Failed to create signaling_call_outcomes_total metric");

        let relay_deliveries_total = IntCounterVec::new(
            Opts::new(
                "signaling_relay_deliveries_total",
                "Total number of relayed events by delivery path",
            ),
            &["path"],
        )
        .expect("Failed to create signaling_relay_deliveries_total metric");

        // 注册指标，忽略重复注册错误（测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(connections_active.clone()));
        let _ = REGISTRY.register(Box::new(inbound_events_total.clone()));
        let _ = REGISTRY.register(Box::new(malformed_events_total.clone()));
        let _ = REGISTRY.register(Box::new(call_outcomes_total.clone()));
        let _ = REGISTRY.register(Box::new(relay_deliveries_total.clone()));

        Self {
            connections_active,
            inbound_events_total,
            malformed_events_total,
            call_outcomes_total,
            relay_deliveries_total,
        }
    }
}

impl Default for SignalingGatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 推送分发指标
pub struct PushMetrics {
    /// 推送通知数（按载荷类型：data_only / visible）
    pub notifications_total: IntCounterVec,
    /// 单个 token 投递结果（success / failure）
    pub token_results_total: IntCounterVec,
}

impl PushMetrics {
    pub fn new() -> Self {
        let notifications_total = IntCounterVec::new(
            Opts::new(
                "push_notifications_total",
                "Total number of push notifications dispatched",
            ),
            &["kind"],
        )
        .expect("Failed to create push_notifications_total metric");

        let token_results_total = IntCounterVec::new(
            Opts::new(
                "push_token_results_total",
                "Per-token push delivery results",
            ),
            &["result"],
        )
        .expect("Failed to create push_token_results_total metric");

        let _ = REGISTRY.register(Box::new(notifications_total.clone()));
        let _ = REGISTRY.register(Box::new(token_results_total.clone()));

        Self {
            notifications_total,
            token_results_total,
        }
    }
}

impl Default for PushMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 Prometheus 文本格式导出全局注册表
pub fn render_metrics() -> String {
    TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_else(|err| format!("# metrics encoding failed: {err}\n"))
}
