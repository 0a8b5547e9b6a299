use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use super::fallback::{AnalysisError, FallbackAnalyst};
use crate::server::models::AnalysisEnvelope;
use crate::server::services::llm::{ChatMessage, LlmService, ToolCallResponse};
use crate::server::services::tools::ToolRegistry;

const SYSTEM_PROMPT: &str = "\
你是一名中国金融市场数据分析师。你可以通过工具获取市场数据和用户上传的数据文件，\
请先取数、后分析，不要臆造数据。完成分析后，用中文输出最终结论，并在结尾附上一个 \
```json 围栏代码块，内容为如下结构的对象：\
{\"summary\": string, \"insights\": [string], \"recommendations\": [string], \
\"risk_level\": \"低风险\"|\"中等风险\"|\"高风险\", \"confidence\": 0 到 1 之间的小数}。";

/// Loop state of one analysis run. Transitions are bounded by the turn
/// budget and the wall-clock deadline, so the loop terminates even against
/// an adversarial model.
enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCallResponse>),
    Done(String),
    Degraded,
}

/// Drives the model↔tool exchange for one analysis request and synthesizes
/// the final envelope. One dispatcher exists per call, owned by the request.
pub struct AnalystService {
    llm: Arc<LlmService>,
    tools: Arc<ToolRegistry>,
    fallback: FallbackAnalyst,
    max_turns: u32,
    deadline: Duration,
}

impl AnalystService {
    pub fn new(
        llm: Arc<LlmService>,
        tools: Arc<ToolRegistry>,
        max_turns: u32,
        deadline: Duration,
    ) -> AnalystService {
        let fallback = FallbackAnalyst::new(Arc::clone(&tools));
        AnalystService {
            llm,
            tools,
            fallback,
            max_turns,
            deadline,
        }
    }

    /// Analyzes `query` under `caller`'s identity. With `use_llm=false` the
    /// rule-based analyzer answers directly; otherwise the model drives the
    /// tool loop and the rule-based path is the degradation target. The
    /// only terminal error is the degraded path failing as well.
    pub async fn analyze(
        &self,
        query: &str,
        caller: &str,
        use_llm: bool,
    ) -> Result<AnalysisEnvelope, AnalysisError> {
        if !use_llm {
            return self.fallback.analyze(query, caller).await;
        }

        let started = Instant::now();
        let declarations = self.tools.declarations();
        let mut history = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(query)];
        let mut partial: Option<String> = None;
        let mut turns = 0u32;
        let mut state = LoopState::AwaitingModel;

        loop {
            match state {
                LoopState::AwaitingModel => {
                    if turns >= self.max_turns {
                        warn!(caller, turns, "analysis hit the turn budget");
                        state = match partial.take() {
                            Some(prose) => LoopState::Done(prose),
                            None => LoopState::Degraded,
                        };
                        continue;
                    }
                    let Some(remaining) = self.deadline.checked_sub(started.elapsed()) else {
                        warn!(caller, "analysis hit the wall-clock deadline");
                        state = match partial.take() {
                            Some(prose) => LoopState::Done(prose),
                            None => LoopState::Degraded,
                        };
                        continue;
                    };

                    turns += 1;
                    let exchange = tokio::time::timeout(
                        remaining,
                        self.llm.chat_with_tools(&history, &declarations),
                    )
                    .await;
                    state = match exchange {
                        Ok(Ok((content, Some(calls)))) if !calls.is_empty() => {
                            history.push(ChatMessage::assistant(
                                content.clone().unwrap_or_default(),
                                Some(calls.clone()),
                            ));
                            if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
                                partial = Some(content);
                            }
                            LoopState::ExecutingTools(calls)
                        }
                        Ok(Ok((Some(content), _))) if !content.trim().is_empty() => {
                            LoopState::Done(content)
                        }
                        Ok(Ok(_)) => {
                            // Neither prose nor tool calls; nothing to iterate on.
                            warn!(caller, turn = turns, "model returned an empty turn");
                            match partial.take() {
                                Some(prose) => LoopState::Done(prose),
                                None => LoopState::Degraded,
                            }
                        }
                        Ok(Err(err)) => {
                            // Any model failure degrades; the request only
                            // errors if the fallback itself cannot answer.
                            warn!(caller, error = %err, "model exchange failed, degrading");
                            match partial.take() {
                                Some(prose) => LoopState::Done(prose),
                                None => LoopState::Degraded,
                            }
                        }
                        Err(_) => {
                            warn!(caller, "model call exceeded the analysis deadline");
                            match partial.take() {
                                Some(prose) => LoopState::Done(prose),
                                None => LoopState::Degraded,
                            }
                        }
                    };
                }

                LoopState::ExecutingTools(calls) => {
                    // The batch runs concurrently, but history entries are
                    // appended in emission order so transcripts stay
                    // deterministic.
                    let results = join_all(calls.iter().map(|call| {
                        self.tools
                            .execute(&call.function.name, &call.function.arguments, caller)
                    }))
                    .await;

                    for (call, result) in calls.iter().zip(results) {
                        let payload = match result {
                            Ok(value) => value.to_string(),
                            Err(message) => json!({ "error": message }).to_string(),
                        };
                        history.push(ChatMessage::tool(call.id.clone(), payload));
                    }
                    state = LoopState::AwaitingModel;
                }

                LoopState::Done(prose) => {
                    info!(caller, turns, "analysis complete");
                    return Ok(AnalysisEnvelope::from_prose(&prose));
                }

                LoopState::Degraded => {
                    info!(caller, turns, "analysis degraded to the rule-based path");
                    return self.fallback.analyze(query, caller).await;
                }
            }
        }
    }
}
