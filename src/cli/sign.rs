use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::storage::BlobLocator;

#[derive(Parser, Debug, Clone)]
pub struct SignCommand {
    /// blob 地址
    pub url: String,
    /// 委托模式下转发给存储服务的 Authorization 头
    #[arg(long, env = "STORAGE_AUTHORIZATION", hide_env_values = true)]
    pub authorization: Option<String>,
}

impl SubCommandExtend for SignCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let locator = BlobLocator::parse(&self.url)?;
        let client = opts.service.http_client()?;
        let credentials = opts.service.credentials(&client)?;

        let credential = credentials.mint(&locator, self.authorization.as_deref()).await?;
        info!("凭证有效期: {} ~ {}", credential.start(), credential.expiry());

        println!("{}", credential.sign_url(locator.url()));
        Ok(())
    }
}
