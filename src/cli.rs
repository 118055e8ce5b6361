//! CLI интерфейс для rustdb-txn
//!
//! Запускает нагрузку на менеджер транзакций и показывает действующую конфигурацию

use crate::common::{EngineConfig, Error, IsolationLevel, Result, TransactionConfig};
use crate::core::TransactionManager;
use crate::workload::{run_workload, WorkloadConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// rustdb-txn - ядро транзакций MV2PL
#[derive(Parser)]
#[command(name = "rustdb-txn")]
#[command(about = "RustDB MV2PL transaction core workload driver")]
#[command(version)]
pub struct Cli {
    /// Конфигурационный файл
    #[arg(short, long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Уровень детализации логирования
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Уровень изоляции в аргументах командной строки
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IsolationArg {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl From<IsolationArg> for IsolationLevel {
    fn from(arg: IsolationArg) -> Self {
        match arg {
            IsolationArg::ReadUncommitted => IsolationLevel::ReadUncommitted,
            IsolationArg::ReadCommitted => IsolationLevel::ReadCommitted,
            IsolationArg::RepeatableRead => IsolationLevel::RepeatableRead,
            IsolationArg::Serializable => IsolationLevel::Serializable,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить нагрузку
    Run {
        /// Число сессий
        #[arg(short, long, default_value = "4")]
        sessions: usize,

        /// Транзакций на сессию
        #[arg(short, long, default_value = "100")]
        transactions: usize,

        /// Операций в транзакции
        #[arg(long, default_value = "4")]
        operations: usize,

        /// Число таблиц
        #[arg(long, default_value = "2")]
        tables: usize,

        /// Уровень изоляции сессий
        #[arg(long, value_enum, default_value = "read-committed")]
        isolation: IsolationArg,

        /// Вывести итоги в JSON
        #[arg(long)]
        json: bool,
    },

    /// Показать действующую конфигурацию
    Config,
}

impl Cli {
    pub fn init() -> Self {
        Self::parse()
    }

    /// Загружает конфигурацию: файл, затем переменные окружения
    pub fn load_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        config.transaction = config.transaction.merge(TransactionConfig::from_env()?);
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Выполняет команду
    pub fn execute(&self, config: &EngineConfig) -> Result<()> {
        match &self.command {
            Some(Commands::Run {
                sessions,
                transactions,
                operations,
                tables,
                isolation,
                json,
            }) => {
                let workload = WorkloadConfig {
                    sessions: *sessions,
                    transactions_per_session: *transactions,
                    operations_per_transaction: *operations,
                    tables: *tables,
                    isolation_level: (*isolation).into(),
                };
                self.run(config, &workload, *json)
            }
            Some(Commands::Config) | None => {
                let text = toml::to_string_pretty(config)?;
                println!("{}", text);
                Ok(())
            }
        }
    }

    fn run(&self, config: &EngineConfig, workload: &WorkloadConfig, json: bool) -> Result<()> {
        let tm = TransactionManager::with_config(config.transaction.clone())?;
        let (report, stats) = run_workload(&tm, workload)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Model:                 {}", tm.transaction_model());
        println!("Committed:             {}", report.committed);
        println!("Aborted:               {}", report.aborted);
        println!("Rows inserted:         {}", report.inserted);
        println!("Rows deleted:          {}", report.deleted);
        println!("Visible rows:          {}", report.visible_rows);
        println!("Merged immediately:    {}", stats.merged_immediately);
        println!("Queued / drained:      {} / {}", stats.queued_transactions, stats.drained_transactions);
        println!("Lock waits:            {}", stats.locks.waits);
        println!("Deadlocks avoided:     {}", stats.locks.deadlocks_avoided);
        println!("Write conflicts:       {}", stats.write_conflicts);
        println!("Elapsed:               {} ms", report.elapsed_ms);

        if stats.committed_queue_length != 0 {
            return Err(Error::internal(format!(
                "{} committed transactions left unmerged",
                stats.committed_queue_length
            )));
        }
        Ok(())
    }
}
