//! Create `email_job` table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailJob::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailJob::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmailJob::Subject).string_len(998).not_null())
                    .col(ColumnDef::new(EmailJob::Body).text().not_null())
                    .col(ColumnDef::new(EmailJob::Sender).string_len(320).not_null())
                    .col(
                        ColumnDef::new(EmailJob::Recipients)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(EmailJob::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EmailJob::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(EmailJob::SentAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(EmailJob::FailedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(EmailJob::Error).text())
                    .col(
                        ColumnDef::new(EmailJob::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(EmailJob::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_job_sender")
                    .table(EmailJob::Table)
                    .col(EmailJob::Sender)
                    .to_owned(),
            )
            .await?;

        // Listing pending jobs by due time
        manager
            .create_index(
                Index::create()
                    .name("idx_email_job_status_scheduled_at")
                    .table(EmailJob::Table)
                    .col(EmailJob::Status)
                    .col(EmailJob::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_job_status_sent_at")
                    .table(EmailJob::Table)
                    .col(EmailJob::Status)
                    .col(EmailJob::SentAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailJob::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum EmailJob {
    Table,
    Id,
    Subject,
    Body,
    Sender,
    Recipients,
    ScheduledAt,
    Status,
    SentAt,
    FailedAt,
    Error,
    CreatedAt,
    UpdatedAt,
}
