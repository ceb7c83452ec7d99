use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_warehouses_table::Migration),
            Box::new(m20240601_000002_create_ledger_tables::Migration),
            Box::new(m20240601_000003_create_derived_stock_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_warehouses_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_warehouses_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Warehouses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Warehouses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Warehouses::OrganizationId).uuid().not_null())
                        .col(ColumnDef::new(Warehouses::Name).string().not_null())
                        .col(
                            ColumnDef::new(Warehouses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_warehouses_organization")
                        .table(Warehouses::Table)
                        .col(Warehouses::OrganizationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Warehouses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
        OrganizationId,
        Name,
        CreatedAt,
    }
}

mod m20240601_000002_create_ledger_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_ledger_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockAdjustments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockAdjustments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAdjustments::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockAdjustments::PartId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockAdjustments::QuantityBefore)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAdjustments::QuantityAfter)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAdjustments::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockAdjustments::RecordedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockAdjustments::Reason).string().not_null())
                        .col(ColumnDef::new(StockAdjustments::Notes).text().null())
                        .col(ColumnDef::new(StockAdjustments::PerformedBy).string().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::PartId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::FromWarehouseId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::ToWarehouseId)
                                .uuid()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::Quantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::TransactionType)
                                .text()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::RecordedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::PerformedBy)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryTransactions::Reference)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(InventoryTransactions::Notes).text().null())
                        .col(
                            ColumnDef::new(InventoryTransactions::AdjustmentId)
                                .uuid()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            let indexes = [
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_adjustments_pair_time")
                    .table(StockAdjustments::Table)
                    .col(StockAdjustments::WarehouseId)
                    .col(StockAdjustments::PartId)
                    .col(StockAdjustments::OccurredAt)
                    .to_owned(),
                Index::create()
                    .if_not_exists()
                    .name("idx_inventory_transactions_to_pair_time")
                    .table(InventoryTransactions::Table)
                    .col(InventoryTransactions::ToWarehouseId)
                    .col(InventoryTransactions::PartId)
                    .col(InventoryTransactions::OccurredAt)
                    .to_owned(),
                Index::create()
                    .if_not_exists()
                    .name("idx_inventory_transactions_from_pair_time")
                    .table(InventoryTransactions::Table)
                    .col(InventoryTransactions::FromWarehouseId)
                    .col(InventoryTransactions::PartId)
                    .col(InventoryTransactions::OccurredAt)
                    .to_owned(),
                Index::create()
                    .if_not_exists()
                    .name("idx_inventory_transactions_adjustment")
                    .table(InventoryTransactions::Table)
                    .col(InventoryTransactions::AdjustmentId)
                    .to_owned(),
            ];
            for index in indexes {
                manager.create_index(index).await?;
            }

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryTransactions::Table).to_owned())
                .await?;

            manager
                .drop_table(Table::drop().table(StockAdjustments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockAdjustments {
        Table,
        Id,
        WarehouseId,
        PartId,
        QuantityBefore,
        QuantityAfter,
        OccurredAt,
        RecordedAt,
        Reason,
        Notes,
        PerformedBy,
    }

    #[derive(DeriveIden)]
    enum InventoryTransactions {
        Table,
        Id,
        PartId,
        FromWarehouseId,
        ToWarehouseId,
        Quantity,
        TransactionType,
        OccurredAt,
        RecordedAt,
        PerformedBy,
        Reference,
        Notes,
        AdjustmentId,
    }
}

mod m20240601_000003_create_derived_stock_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_derived_stock_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DerivedStock::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(DerivedStock::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(DerivedStock::PartId).uuid().not_null())
                        .col(
                            ColumnDef::new(DerivedStock::CachedQuantity)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DerivedStock::ComputedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(DerivedStock::WarehouseId)
                                .col(DerivedStock::PartId),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DerivedStock::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DerivedStock {
        Table,
        WarehouseId,
        PartId,
        CachedQuantity,
        ComputedAt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn migration_names_are_unique_and_ordered() {
        let names: Vec<String> = Migrator::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "m20240601_000001_create_warehouses_table",
                "m20240601_000002_create_ledger_tables",
                "m20240601_000003_create_derived_stock_table",
            ]
        );
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), names.len());
    }
}
