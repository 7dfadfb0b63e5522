//! Migration to create project_error_settings table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProjectErrorSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProjectErrorSettings::ProjectId)
                            .uuid()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProjectErrorSettings::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ProjectErrorSettings::TrackerRepository).string())
                    .col(ColumnDef::new(ProjectErrorSettings::TrackerToken).text())
                    .col(ColumnDef::new(ProjectErrorSettings::TrackerLabels).json_binary())
                    .col(
                        ColumnDef::new(ProjectErrorSettings::CreateIssues)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ProjectErrorSettings::MaxIssuesPerDay)
                            .integer()
                            .not_null()
                            .default(10),
                    )
                    .col(
                        ColumnDef::new(ProjectErrorSettings::MinOccurrences)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(ProjectErrorSettings::IgnorePatterns).json_binary())
                    .col(ColumnDef::new(ProjectErrorSettings::StatusCodes).json_binary())
                    .col(
                        ColumnDef::new(ProjectErrorSettings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ProjectErrorSettings::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProjectErrorSettings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ProjectErrorSettings {
    Table,
    ProjectId,
    Enabled,
    TrackerRepository,
    TrackerToken,
    TrackerLabels,
    CreateIssues,
    MaxIssuesPerDay,
    MinOccurrences,
    IgnorePatterns,
    StatusCodes,
    CreatedAt,
    UpdatedAt,
}
