use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::cache::DataCache;
use super::catalog::Catalog;
use super::files::FileStore;
use super::llm::{LlmService, Tool};

/// Page size used when a tool call does not ask for one; keeps tool results
/// small enough to feed back into the model context.
const TOOL_PAGE_SIZE: usize = 50;

/// The closed set of capabilities the model may invoke. Every execution
/// happens under the calling user's identity; the model cannot name another
/// subject.
pub struct ToolRegistry {
    catalog: Arc<Catalog>,
    cache: Arc<DataCache>,
    files: Arc<FileStore>,
}

#[derive(Debug, Deserialize)]
struct FetchMarketDataArgs {
    interface: String,
    #[serde(default)]
    params: Map<String, Value>,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ReadMyFileArgs {
    filename: String,
    page: Option<usize>,
    page_size: Option<usize>,
}

impl ToolRegistry {
    pub fn new(catalog: Arc<Catalog>, cache: Arc<DataCache>, files: Arc<FileStore>) -> ToolRegistry {
        ToolRegistry {
            catalog,
            cache,
            files,
        }
    }

    /// Tool declarations sent to the model with every analysis request.
    pub fn declarations(&self) -> Vec<Tool> {
        vec![
            LlmService::create_tool(
                "fetch_market_data",
                "按接口名拉取市场数据（带缓存）。用 describe_interfaces 查看可用接口及示例参数。",
                json!({
                    "type": "object",
                    "properties": {
                        "interface": {
                            "type": "string",
                            "description": "接口名称，例如 stock_zh_a_hist"
                        },
                        "params": {
                            "type": "object",
                            "description": "接口参数，键值均为标量"
                        },
                        "page": {"type": "integer", "minimum": 1},
                        "page_size": {"type": "integer", "minimum": 1, "maximum": 500}
                    },
                    "required": ["interface"]
                }),
            ),
            LlmService::create_tool(
                "list_my_files",
                "列出当前用户上传的数据文件。",
                json!({"type": "object", "properties": {}}),
            ),
            LlmService::create_tool(
                "read_my_file",
                "读取当前用户上传的 CSV 文件内容（分页）。",
                json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "page": {"type": "integer", "minimum": 1},
                        "page_size": {"type": "integer", "minimum": 1, "maximum": 500}
                    },
                    "required": ["filename"]
                }),
            ),
            LlmService::create_tool(
                "describe_interfaces",
                "列出可调用的上游数据接口及示例参数。",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    /// Executes one tool call for `caller`. Failures come back as plain
    /// strings; the dispatcher feeds them to the model as error payloads
    /// rather than aborting the loop.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &str,
        caller: &str,
    ) -> Result<Value, String> {
        debug!(tool = name, caller, "executing tool call");
        match name {
            "fetch_market_data" => {
                let args: FetchMarketDataArgs =
                    serde_json::from_str(arguments).map_err(|e| format!("无效参数: {e}"))?;
                let table = self
                    .cache
                    .get_or_compute(&args.interface, &args.params)
                    .await
                    .map_err(|e| e.to_string())?;
                let page = table.paginate(
                    args.page.unwrap_or(1),
                    args.page_size.unwrap_or(TOOL_PAGE_SIZE),
                );
                serde_json::to_value(page).map_err(|e| e.to_string())
            }
            "list_my_files" => {
                let names = self.files.list(caller).await.map_err(|e| e.to_string())?;
                Ok(json!({ "files": names }))
            }
            "read_my_file" => {
                let args: ReadMyFileArgs =
                    serde_json::from_str(arguments).map_err(|e| format!("无效参数: {e}"))?;
                let page = self
                    .files
                    .browse(
                        caller,
                        &args.filename,
                        args.page.unwrap_or(1),
                        args.page_size.unwrap_or(TOOL_PAGE_SIZE),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                serde_json::to_value(page).map_err(|e| e.to_string())
            }
            "describe_interfaces" => {
                let interfaces: Vec<Value> = self
                    .catalog
                    .list()
                    .into_iter()
                    .map(|i| {
                        json!({
                            "name": i.name,
                            "description": i.description,
                            "example_params": i.example_params,
                        })
                    })
                    .collect();
                Ok(json!({ "interfaces": interfaces }))
            }
            other => Err(format!("未知工具: {other}")),
        }
    }
}
