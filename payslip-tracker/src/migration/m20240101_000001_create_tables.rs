use sea_orm_migration::prelude::*;

use crate::tracker::MAX_DESCRIPTION_LENGTH;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden, Clone, Copy)]
enum Contact {
    Table,
    Id,
    FirstName,
    LastName,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum ContactConfig {
    Table,
    Id,
    ContactId,
}

#[derive(DeriveIden, Clone, Copy)]
enum User {
    Table,
    Id,
    ContactId,
    Username,
    IdentityUid,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum Income {
    Table,
    Id,
    ContactId,
    Amount,
    Description,
    IncomeDate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum Goal {
    Table,
    Id,
    ContactId,
    TargetAmount,
    Description,
    TargetDate,
    CreatedAt,
    UpdatedAt,
}

/// `contact_id` column with its foreign key. Deletes are applied by the
/// data layer, so the database only clears dangling references.
fn contact_reference<T: IntoIden + Copy + 'static>(
    table: T,
    column: T,
    name: &str,
) -> (ColumnDef, ForeignKeyCreateStatement) {
    let column_def = ColumnDef::new(column).uuid().null().to_owned();
    let foreign_key = ForeignKey::create()
        .name(name)
        .from(table, column)
        .to(Contact::Table, Contact::Id)
        .on_delete(ForeignKeyAction::SetNull)
        .to_owned();
    (column_def, foreign_key)
}

fn contact_index<T: IntoIden + Copy + 'static>(
    table: T,
    column: T,
    name: &str,
) -> IndexCreateStatement {
    Index::create()
        .name(name)
        .table(table)
        .col(column)
        .if_not_exists()
        .to_owned()
}

fn description_column<T: IntoIden>(column: T) -> ColumnDef {
    ColumnDef::new(column)
        .string_len(<u32 as TryFrom<_>>::try_from(MAX_DESCRIPTION_LENGTH).unwrap_or(u32::MAX))
        .null()
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contact::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contact::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Contact::FirstName).string().null())
                    .col(ColumnDef::new(Contact::LastName).string().null())
                    .col(ColumnDef::new(Contact::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Contact::UpdatedAt).timestamp_with_time_zone().null())
                    .to_owned(),
            )
            .await?;

        let (mut contact_id, mut foreign_key) = contact_reference(
            ContactConfig::Table,
            ContactConfig::ContactId,
            "fk_contact_config_contact",
        );
        manager
            .create_table(
                Table::create()
                    .table(ContactConfig::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ContactConfig::Id).uuid().not_null().primary_key())
                    .col(&mut contact_id)
                    .foreign_key(&mut foreign_key)
                    .to_owned(),
            )
            .await?;

        let (mut contact_id, mut foreign_key) =
            contact_reference(User::Table, User::ContactId, "fk_user_contact");
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(User::Id).uuid().not_null().primary_key())
                    .col(&mut contact_id)
                    .col(ColumnDef::new(User::Username).string().null().unique_key())
                    .col(ColumnDef::new(User::IdentityUid).string().null())
                    .col(ColumnDef::new(User::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(User::UpdatedAt).timestamp_with_time_zone().null())
                    .foreign_key(&mut foreign_key)
                    .to_owned(),
            )
            .await?;

        let (mut contact_id, mut foreign_key) =
            contact_reference(Income::Table, Income::ContactId, "fk_income_contact");
        manager
            .create_table(
                Table::create()
                    .table(Income::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Income::Id).uuid().not_null().primary_key())
                    .col(&mut contact_id)
                    .col(ColumnDef::new(Income::Amount).double().null())
                    .col(&mut description_column(Income::Description))
                    .col(ColumnDef::new(Income::IncomeDate).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Income::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Income::UpdatedAt).timestamp_with_time_zone().null())
                    .foreign_key(&mut foreign_key)
                    .to_owned(),
            )
            .await?;

        let (mut contact_id, mut foreign_key) =
            contact_reference(Goal::Table, Goal::ContactId, "fk_goal_contact");
        manager
            .create_table(
                Table::create()
                    .table(Goal::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Goal::Id).uuid().not_null().primary_key())
                    .col(&mut contact_id)
                    .col(ColumnDef::new(Goal::TargetAmount).double().null())
                    .col(&mut description_column(Goal::Description))
                    .col(ColumnDef::new(Goal::TargetDate).timestamp_with_time_zone().null())
                    .col(ColumnDef::new(Goal::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Goal::UpdatedAt).timestamp_with_time_zone().null())
                    .foreign_key(&mut foreign_key)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(contact_index(
                ContactConfig::Table,
                ContactConfig::ContactId,
                "idx_contact_config_contact",
            ))
            .await?;
        manager
            .create_index(contact_index(User::Table, User::ContactId, "idx_user_contact"))
            .await?;
        manager
            .create_index(contact_index(Income::Table, Income::ContactId, "idx_income_contact"))
            .await?;
        manager
            .create_index(contact_index(Goal::Table, Goal::ContactId, "idx_goal_contact"))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            Goal::Table.into_iden(),
            Income::Table.into_iden(),
            User::Table.into_iden(),
            ContactConfig::Table.into_iden(),
            Contact::Table.into_iden(),
        ] {
            manager
                .drop_table(Table::drop().table(table).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}
