//! Migration to create issue_creation_counters table
//!
//! One row per project and UTC day; `created_count` is bumped atomically each
//! time the orchestrator reserves an issue creation.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IssueCreationCounters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IssueCreationCounters::ProjectId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IssueCreationCounters::DayBucket)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IssueCreationCounters::CreatedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(IssueCreationCounters::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(IssueCreationCounters::ProjectId)
                            .col(IssueCreationCounters::DayBucket),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IssueCreationCounters::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum IssueCreationCounters {
    Table,
    ProjectId,
    DayBucket,
    CreatedCount,
    UpdatedAt,
}
