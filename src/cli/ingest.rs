use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::server::VectorizeResponse;
use crate::types::{ImageRecord, RecordId};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    /// 图片的 blob 地址，记录 ID 为其在参数中的序号
    pub urls: Vec<String>,
    /// 从文件读取图片列表，每行一个地址，或者 `ID<TAB>地址`
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,
    /// 委托模式下转发给存储服务的 Authorization 头
    #[arg(long, env = "STORAGE_AUTHORIZATION", hide_env_values = true)]
    pub authorization: Option<String>,
}

/// 解析列表文件中的一行，空行和 `#` 开头的行会被跳过
pub fn parse_record_line(line: &str, line_no: usize) -> Option<ImageRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let record = match line.split_once('\t') {
        Some((id, url)) => {
            let id = match id.trim().parse::<i64>() {
                Ok(id) => RecordId::Int(id),
                Err(_) => RecordId::Str(id.trim().to_string()),
            };
            ImageRecord::new(id, url.trim())
        }
        None => ImageRecord::new(line_no as i64, line),
    };
    Some(record)
}

impl IngestCommand {
    async fn records(&self) -> Result<Vec<ImageRecord>> {
        let mut records = self
            .urls
            .iter()
            .enumerate()
            .map(|(i, url)| ImageRecord::new(i as i64 + 1, url.as_str()))
            .collect::<Vec<_>>();

        if let Some(file) = &self.file {
            let content = tokio::fs::read_to_string(file).await?;
            records.extend(
                content.lines().enumerate().filter_map(|(i, line)| parse_record_line(line, i + 1)),
            );
        }

        if records.is_empty() {
            bail!("没有需要处理的图片");
        }
        Ok(records)
    }
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let records = self.records().await?;
        let client = opts.service.http_client()?;
        let pipeline = opts.service.ingest_pipeline(&client)?;

        let pb = ProgressBar::new(records.len() as u64).with_style(pb_style());
        let mut values = Vec::with_capacity(records.len());
        let mut failed = 0;

        let mut stream = Box::pin(pipeline.stream(records, self.authorization.as_deref()));
        while let Some(value) = stream.next().await {
            match &value.errors {
                Some(err) => {
                    failed += 1;
                    pb.println(format!("[ERR] {}: {}", value.record_id, err));
                }
                None => pb.set_message(format!("{}", value.record_id)),
            }
            pb.inc(1);
            values.push(value);
        }

        pb.finish_with_message("图片处理完成");
        info!("共 {} 张图片，失败 {} 张", values.len(), failed);

        println!("{}", serde_json::to_string_pretty(&VectorizeResponse { values })?);
        Ok(())
    }
}
