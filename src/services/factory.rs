use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        adjustment_writer::AdjustmentWriter, aggregator::Aggregator,
        cache_refresher::CacheRefresher, ledger::LedgerService, pair_locks::PairLocks,
        stock_calculator::StockCalculator,
    },
};

/// Factory for creating service instances with shared dependencies
///
/// Every writer built by one factory shares one `PairLocks` registry; writers built by
/// different factories against the same database would not serialize against each other.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    locks: PairLocks,
    audit_transactions: bool,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            locks: PairLocks::new(config.pair_lock_timeout()),
            audit_transactions: config.audit_transactions,
        }
    }

    pub fn ledger(&self) -> LedgerService {
        LedgerService::new(
            self.db_pool.clone(),
            self.locks.clone(),
            self.event_sender.clone(),
        )
    }

    pub fn calculator(&self) -> StockCalculator {
        StockCalculator::new(self.db_pool.clone())
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn adjustment_writer(&self) -> AdjustmentWriter {
        AdjustmentWriter::new(
            self.db_pool.clone(),
            self.locks.clone(),
            self.event_sender.clone(),
            self.audit_transactions,
        )
    }

    pub fn cache_refresher(&self) -> CacheRefresher {
        CacheRefresher::new(
            self.db_pool.clone(),
            self.aggregator(),
            self.event_sender.clone(),
        )
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Every engine operation behind one cloneable handle
#[derive(Debug, Clone)]
pub struct InventoryEngine {
    pub ledger: LedgerService,
    pub calculator: StockCalculator,
    pub aggregator: Aggregator,
    pub adjustments: AdjustmentWriter,
    pub cache: CacheRefresher,
}

impl InventoryEngine {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            ledger: factory.ledger(),
            calculator: factory.calculator(),
            aggregator: factory.aggregator(),
            adjustments: factory.adjustment_writer(),
            cache: factory.cache_refresher(),
        }
    }

    pub fn from_config(db_pool: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        Self::new(&ServiceFactory::new(db_pool, event_sender, config))
    }
}
