use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::driver::{ConnectionProvider, CopySession, DriverError, bind_params};

/// 会话调用记录
#[derive(Debug, Default)]
pub struct Journal {
    pub connects: Vec<String>,
    pub statements: Vec<String>,
    pub binds: Vec<String>,
    pub copy_out: Vec<String>,
    pub copy_in: Vec<(String, Vec<u8>)>,
    /// 按发生顺序记录 execute / copy_in / commit
    pub events: Vec<String>,
    pub commits: usize,
    pub released: usize,
}

#[derive(Clone, Copy)]
enum Rows {
    Fixed(Option<u64>),
    CountLines,
}

/// 内存中的 ConnectionProvider，用于不连数据库的算子测试
pub struct MockProvider {
    journal: Arc<Mutex<Journal>>,
    output: Vec<u8>,
    rows: Rows,
    fail_copy: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            journal: Arc::default(),
            output: b"id,name\n1,alice\n".to_vec(),
            rows: Rows::Fixed(Some(42)),
            fail_copy: false,
        }
    }

    pub fn with_output(
        mut self,
        output: &[u8],
    ) -> Self {
        self.output = output.to_vec();
        self
    }

    /// copy_in 回报的行数
    pub fn with_rowcount(
        mut self,
        rows: Option<u64>,
    ) -> Self {
        self.rows = Rows::Fixed(rows);
        self
    }

    /// copy_in 返回收到的数据行数（命令带 HEADER 时扣除表头）
    pub fn counting_rows(mut self) -> Self {
        self.rows = Rows::CountLines;
        self
    }

    /// COPY 写出一部分数据后失败
    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }
}

impl ConnectionProvider for MockProvider {
    fn connect(
        &self,
        reference: &str,
    ) -> Result<Box<dyn CopySession>, DriverError> {
        self.journal().connects.push(reference.to_string());
        Ok(Box::new(MockSession {
            journal: Arc::clone(&self.journal),
            output: self.output.clone(),
            rows: self.rows,
            fail_copy: self.fail_copy,
        }))
    }
}

struct MockSession {
    journal: Arc<Mutex<Journal>>,
    output: Vec<u8>,
    rows: Rows,
    fail_copy: bool,
}

impl MockSession {
    fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }
}

impl CopySession for MockSession {
    fn execute(
        &mut self,
        sql: &str,
    ) -> Result<u64, DriverError> {
        let mut journal = self.journal();
        journal.statements.push(sql.to_string());
        journal.events.push(format!("execute: {}", sql));
        Ok(0)
    }

    fn bind(
        &mut self,
        sql: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<String, DriverError> {
        self.journal().binds.push(sql.to_string());
        bind_params(sql, params)
    }

    fn copy_out(
        &mut self,
        command: &str,
        writer: &mut dyn Write,
    ) -> Result<Option<u64>, DriverError> {
        self.journal().copy_out.push(command.to_string());
        if self.fail_copy {
            writer.write_all(&self.output[..self.output.len() / 2])?;
            return Err(DriverError::Other("canceling statement due to statement timeout".into()));
        }
        writer.write_all(&self.output)?;
        // 同步驱动拿不到 COPY 的行数
        Ok(None)
    }

    fn copy_in(
        &mut self,
        command: &str,
        reader: &mut dyn Read,
    ) -> Result<Option<u64>, DriverError> {
        let mut data = vec![];
        reader.read_to_end(&mut data)?;
        {
            let mut journal = self.journal();
            journal.copy_in.push((command.to_string(), data.clone()));
            journal.events.push(format!("copy_in: {}", command));
        }
        if self.fail_copy {
            return Err(DriverError::Other("duplicate key value violates unique constraint".into()));
        }
        match self.rows {
            Rows::Fixed(rows) => Ok(rows),
            Rows::CountLines => {
                let lines = String::from_utf8_lossy(&data).lines().filter(|l| !l.is_empty()).count() as u64;
                let header = u64::from(command.ends_with(" HEADER"));
                Ok(Some(lines.saturating_sub(header)))
            }
        }
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        let mut journal = self.journal();
        journal.commits += 1;
        journal.events.push("commit".into());
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_out_rowcount_is_unknown() {
        let provider = MockProvider::new().with_rowcount(Some(7));
        let mut session = provider.connect("c").unwrap();
        let mut out = vec![];
        assert_eq!(session.copy_out("COPY (SELECT 1) TO STDOUT WITH CSV", &mut out).unwrap(), None);
        assert_eq!(out, b"id,name\n1,alice\n");
        assert_eq!(session.copy_in("COPY t FROM STDIN WITH CSV", &mut &b"1\n"[..]).unwrap(), Some(7));
    }
}
