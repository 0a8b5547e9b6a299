use std::sync::Arc;
use std::sync::OnceLock;

use chrono::{Duration, Local};
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::server::models::{AnalysisEnvelope, RiskLevel};
use crate::server::services::tools::ToolRegistry;

/// Interface queried when the degraded analyzer recognizes a stock code.
const DEFAULT_INTERFACE: &str = "stock_zh_a_hist";

/// Terminal failure of an analysis run: the model was out of reach and the
/// rule-based path could not produce an answer either.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("degraded analysis could not fetch market data: {0}")]
    DegradedFetch(String),
}

/// Rule-based analyzer used when the model is unreachable or the caller
/// opts out of the LLM. It extracts an A-share code from the prompt, pulls
/// one window of daily history through the regular tool path, and renders a
/// templated envelope with `confidence` null.
pub struct FallbackAnalyst {
    tools: Arc<ToolRegistry>,
}

impl FallbackAnalyst {
    pub fn new(tools: Arc<ToolRegistry>) -> FallbackAnalyst {
        FallbackAnalyst { tools }
    }

    /// Answers without the model. A prompt with no recognizable stock code
    /// gets a templated envelope explaining what this mode can do; a
    /// recognized code whose data cannot be fetched is a hard failure, so
    /// the caller sees that analysis was impossible rather than an empty
    /// success.
    pub async fn analyze(&self, query: &str, caller: &str) -> Result<AnalysisEnvelope, AnalysisError> {
        let Some(symbol) = extract_stock_code(query) else {
            info!(caller, "degraded analysis without a recognizable stock code");
            return Ok(self.no_symbol_envelope(query));
        };

        let today = Local::now().date_naive();
        let start = today - Duration::days(30);
        let arguments = json!({
            "interface": DEFAULT_INTERFACE,
            "params": {
                "symbol": symbol,
                "period": "daily",
                "start_date": start.format("%Y%m%d").to_string(),
                "end_date": today.format("%Y%m%d").to_string(),
            },
        })
        .to_string();

        match self
            .tools
            .execute("fetch_market_data", &arguments, caller)
            .await
        {
            Ok(page) => Ok(self.envelope_from_history(query, &symbol, &page)),
            Err(err) => {
                warn!(caller, %symbol, error = %err, "degraded analysis could not fetch data");
                Err(AnalysisError::DegradedFetch(err))
            }
        }
    }

    fn envelope_from_history(
        &self,
        query: &str,
        symbol: &str,
        page: &Value,
    ) -> AnalysisEnvelope {
        let records = page
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = page
            .get("total_records")
            .and_then(Value::as_u64)
            .unwrap_or(records.len() as u64);

        let closes: Vec<f64> = records.iter().filter_map(close_of).collect();
        let mut insights = vec![format!("近 30 天共获取 {total} 条日线记录")];
        let mut risk_level = None;

        if let (Some(first), Some(last)) = (closes.first(), closes.last()) {
            let change = (last - first) / first * 100.0;
            insights.push(format!("区间收盘价从 {first:.2} 变动至 {last:.2}（{change:+.2}%）"));
            risk_level = Some(if change.abs() >= 8.0 {
                RiskLevel::High
            } else if change.abs() >= 3.0 {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            });
        }

        let summary = format!(
            "检测到股票代码 {symbol}，已基于最近 30 天的日线行情生成基础分析（当前为降级模式，未使用大模型）。"
        );
        AnalysisEnvelope {
            summary,
            insights,
            recommendations: vec![
                "以上为规则化统计，建议结合基本面与市场环境综合判断".to_string(),
                "如需深入分析，请在模型服务恢复后重试".to_string(),
            ],
            risk_level,
            confidence: None,
            raw: query.to_string(),
        }
    }

    fn no_symbol_envelope(&self, query: &str) -> AnalysisEnvelope {
        AnalysisEnvelope {
            summary: "未能从问题中识别出股票代码，降级模式下无法取数；请提供六位 A 股代码（如 000001）。"
                .to_string(),
            insights: Vec::new(),
            recommendations: vec![
                "示例：分析 600519 最近表现".to_string(),
                "也可先上传自有数据文件，再通过分析接口引用".to_string(),
            ],
            risk_level: None,
            confidence: None,
            raw: query.to_string(),
        }
    }
}

/// First six-digit run in the prompt, the conventional A-share code shape.
fn extract_stock_code(query: &str) -> Option<String> {
    static CODE: OnceLock<Regex> = OnceLock::new();
    let code = CODE.get_or_init(|| Regex::new(r"\d{6}").expect("code regex"));
    code.find(query).map(|m| m.as_str().to_string())
}

/// Close price of one record, accepting both the Chinese and the English
/// column name and both string and numeric cells.
fn close_of(record: &Value) -> Option<f64> {
    let value = record.get("收盘").or_else(|| record.get("close"))?;
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_six_digit_codes() {
        assert_eq!(extract_stock_code("分析000001最近表现"), Some("000001".to_string()));
        assert_eq!(extract_stock_code("看看600519怎么样"), Some("600519".to_string()));
        assert_eq!(extract_stock_code("大盘如何"), None);
    }

    #[test]
    fn close_reads_both_dialects() {
        assert_eq!(close_of(&json!({"收盘": 10.5})), Some(10.5));
        assert_eq!(close_of(&json!({"close": "11.2"})), Some(11.2));
        assert_eq!(close_of(&json!({"open": 9.0})), None);
    }
}
