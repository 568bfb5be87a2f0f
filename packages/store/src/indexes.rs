use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::entity::{context, entities, parameter};

/// Ensure the composite lookup indexes exist.
///
/// Schema sync only creates single-column and unique indexes, so the
/// composite ones used by filters and context lookups are created here on
/// startup.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Filter subqueries: WHERE name = ? AND <value clause>, selecting entity_id
    create_index(
        db,
        "idx_parameter_name_entity",
        Index::create()
            .table(parameter::Entity)
            .col(parameter::Column::Name)
            .col(parameter::Column::EntityId)
            .to_owned(),
    )
    .await;

    // Incoming associations of an entity, optionally by label
    create_index(
        db,
        "idx_context_attachment_type",
        Index::create()
            .table(context::Entity)
            .col(context::Column::AttachmentId)
            .col(context::Column::ConnectionType)
            .to_owned(),
    )
    .await;

    // Roots of a given type
    create_index(
        db,
        "idx_entities_type_parent",
        Index::create()
            .table(entities::Entity)
            .col(entities::Column::TypeName)
            .col(entities::Column::ParentId)
            .to_owned(),
    )
    .await;

    Ok(())
}

async fn create_index(db: &DatabaseConnection, name: &str, mut stmt: IndexCreateStatement) {
    stmt.if_not_exists().name(name);
    let sql = db.get_database_backend().build(&stmt);

    match db.execute_raw(sql).await {
        Ok(_) => info!("Ensured index {} exists", name),
        Err(e) => warn!("Failed to create index {}: {}", name, e),
    }
}
