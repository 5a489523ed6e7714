use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::pipeline::QueryRequest;
use crate::types::SearchResult;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 自然语言查询
    pub query: String,
    /// 最多返回的图片数量
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub max_images: Option<i64>,
    /// 委托模式下转发给存储服务的 Authorization 头
    #[arg(long, env = "STORAGE_AUTHORIZATION", hide_env_values = true)]
    pub authorization: Option<String>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 先校验请求，避免在无效请求上构造客户端
        let query = QueryRequest::new(&self.query, self.max_images).validate()?;

        let client = opts.service.http_client()?;
        let pipeline = opts.service.query_pipeline(&client)?;
        let result = pipeline.run(&query, self.authorization.as_deref()).await?;

        print_result(&result, self)
    }
}

fn print_result(result: &[SearchResult], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for item in result {
                println!("{:.4}\t{}\t{}", item.score, item.title, item.image_url);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
