use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use postgres::{Client, Config, NoTls};
use serde_json::Value;

use crate::PostgresOptions;

use super::{CopySession, DatabaseDriver, DriverError, bind_params, validate_sql};

#[derive(Debug, Clone, Copy)]
pub struct PostgresDriver;

impl DatabaseDriver for PostgresDriver {
    type Config = PostgresOptions;

    fn check_connection(
        &self,
        config: &Self::Config,
    ) -> Result<(), DriverError> {
        let mut client = open_conn(config)?;
        client
            .simple_query("SELECT 1")
            .map_err(|err| DriverError::Other(format!("校验查询失败: {}", err)))?;
        Ok(())
    }

    fn create_connection(
        &self,
        config: &Self::Config,
    ) -> Result<Box<dyn CopySession>, DriverError> {
        let client = open_conn(config)?;
        Ok(Box::new(PostgresSession::new(client)))
    }
}

/// 首条语句前隐式 `BEGIN`，`commit` 前的所有语句共享一个事务
struct PostgresSession {
    client: Client,
    in_transaction: bool,
}

impl PostgresSession {
    fn new(client: Client) -> Self {
        Self {
            client,
            in_transaction: false,
        }
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        if !self.in_transaction {
            self.client.batch_execute("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl CopySession for PostgresSession {
    fn execute(
        &mut self,
        sql: &str,
    ) -> Result<u64, DriverError> {
        validate_sql(sql)?;
        self.begin()?;
        tracing::debug!(sql = %sql);
        let affected = self.client.execute(sql, &[])?;
        Ok(affected)
    }

    fn bind(
        &mut self,
        sql: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<String, DriverError> {
        bind_params(sql, params)
    }

    fn copy_out(
        &mut self,
        command: &str,
        writer: &mut dyn Write,
    ) -> Result<Option<u64>, DriverError> {
        self.begin()?;
        tracing::debug!(command = %command);
        let mut reader = self.client.copy_out(command)?;
        io::copy(&mut reader, writer)?;
        // 协议的 CopyOut 流不回报行数
        Ok(None)
    }

    fn copy_in(
        &mut self,
        command: &str,
        reader: &mut dyn Read,
    ) -> Result<Option<u64>, DriverError> {
        self.begin()?;
        tracing::debug!(command = %command);
        let mut writer = self.client.copy_in(command)?;
        io::copy(reader, &mut writer)?;
        let rows = writer.finish()?;
        Ok(Some(rows))
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        if self.in_transaction {
            self.client.batch_execute("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Err(err) = self.client.batch_execute("ROLLBACK") {
                tracing::warn!("回滚未提交事务失败: {}", err);
            }
        }
    }
}

fn open_conn(config: &PostgresOptions) -> Result<Client, DriverError> {
    if config.host.trim().is_empty() {
        return Err(DriverError::MissingField("host".into()));
    }
    if config.username.trim().is_empty() {
        return Err(DriverError::MissingField("username".into()));
    }
    if config.database.trim().is_empty() {
        return Err(DriverError::MissingField("database".into()));
    }
    if config.use_tls {
        return Err(DriverError::Other("PostgreSQL 暂未支持 TLS 连接".into()));
    }

    let port = config
        .port
        .trim()
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidField(format!("port: {}", config.port)))?;

    let mut pg_config = Config::new();
    pg_config.host(config.host.trim());
    pg_config.port(port);
    pg_config.user(config.username.trim());
    if !config.password.is_empty() {
        pg_config.password(config.password.as_str());
    }
    pg_config.dbname(config.database.trim());
    pg_config.application_name("pgcsv");

    let client = pg_config
        .connect(NoTls)
        .map_err(|err| DriverError::Other(format!("连接失败: {}", err)))?;
    Ok(client)
}
