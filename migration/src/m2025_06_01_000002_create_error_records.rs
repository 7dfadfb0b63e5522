//! Migration to create error_records table
//!
//! The `(project_id, fingerprint)` unique index is the conflict target of the
//! intake upsert; concurrent reports for one fingerprint collapse on it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ErrorRecords::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ErrorRecords::Id).uuid().primary_key())
                    .col(ColumnDef::new(ErrorRecords::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(ErrorRecords::Fingerprint).string().not_null())
                    .col(ColumnDef::new(ErrorRecords::ErrorType).string().not_null())
                    .col(ColumnDef::new(ErrorRecords::ErrorCode).string())
                    .col(ColumnDef::new(ErrorRecords::Message).text().not_null())
                    .col(ColumnDef::new(ErrorRecords::StackTrace).text())
                    .col(ColumnDef::new(ErrorRecords::Url).text())
                    .col(ColumnDef::new(ErrorRecords::UserId).string())
                    .col(ColumnDef::new(ErrorRecords::Environment).json_binary())
                    .col(ColumnDef::new(ErrorRecords::Metadata).json_binary())
                    .col(
                        ColumnDef::new(ErrorRecords::OccurrenceCount)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(ErrorRecords::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ErrorRecords::LastSeenAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ErrorRecords::IssueNumber).big_integer())
                    .col(
                        ColumnDef::new(ErrorRecords::IssueState)
                            .string()
                            .not_null()
                            .default("none"),
                    )
                    .col(
                        ColumnDef::new(ErrorRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ErrorRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-error_records-project_fingerprint")
                    .table(ErrorRecords::Table)
                    .col(ErrorRecords::ProjectId)
                    .col(ErrorRecords::Fingerprint)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-error_records-project_last_seen")
                    .table(ErrorRecords::Table)
                    .col(ErrorRecords::ProjectId)
                    .col(ErrorRecords::LastSeenAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-error_records-project_issue_state")
                    .table(ErrorRecords::Table)
                    .col(ErrorRecords::ProjectId)
                    .col(ErrorRecords::IssueState)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ErrorRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ErrorRecords {
    Table,
    Id,
    ProjectId,
    Fingerprint,
    ErrorType,
    ErrorCode,
    Message,
    StackTrace,
    Url,
    UserId,
    Environment,
    Metadata,
    OccurrenceCount,
    FirstSeenAt,
    LastSeenAt,
    IssueNumber,
    IssueState,
    CreatedAt,
    UpdatedAt,
}
