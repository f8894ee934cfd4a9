use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::prompts::{Group, GroupWithSubgroups, Subgroup, SubgroupDetails, TaxonomyStore};

use super::database::Database;
use super::time::{column_datetime, to_db_string};

fn row_to_subgroup(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subgroup> {
    Ok(Subgroup {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        order_id: row.get(3)?,
        created_at: column_datetime(row, 4)?,
    })
}

fn query_subgroup(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Subgroup>> {
    conn.query_row(
        "SELECT id, group_id, name, order_id, created_at FROM prompt_subgroups WHERE id = ?1",
        [id],
        row_to_subgroup,
    )
    .optional()
}

#[async_trait]
impl TaxonomyStore for Database {
    async fn list_groups(&self) -> rusqlite::Result<Vec<GroupWithSubgroups>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, order_id, created_at FROM prompt_groups ORDER BY order_id, name",
        )?;
        let groups = stmt.query_map([], |row| {
            Ok(Group {
                id: row.get(0)?,
                name: row.get(1)?,
                order_id: row.get(2)?,
                created_at: column_datetime(row, 3)?,
            })
        })?;
        let mut out = Vec::new();
        for g in groups {
            out.push(GroupWithSubgroups {
                group: g?,
                subgroups: Vec::new(),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, group_id, name, order_id, created_at FROM prompt_subgroups
             ORDER BY order_id, name",
        )?;
        let subgroups = stmt.query_map([], row_to_subgroup)?;
        for s in subgroups {
            let s = s?;
            if let Some(parent) = out.iter_mut().find(|g| g.group.id == s.group_id) {
                parent.subgroups.push(s);
            }
        }
        Ok(out)
    }

    async fn list_subgroups(&self, group_id: Option<&str>) -> rusqlite::Result<Vec<Subgroup>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, group_id, name, order_id, created_at FROM prompt_subgroups
             WHERE (?1 IS NULL OR group_id = ?1)
             ORDER BY order_id, name",
        )?;
        let rows = stmt.query_map([group_id], row_to_subgroup)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn get_subgroup(&self, id: &str) -> rusqlite::Result<Option<Subgroup>> {
        let conn = self.connection.lock().await;
        query_subgroup(&conn, id)
    }

    async fn subgroup_details(&self, id: &str) -> rusqlite::Result<Option<SubgroupDetails>> {
        let conn = self.connection.lock().await;
        let Some(subgroup) = query_subgroup(&conn, id)? else {
            return Ok(None);
        };
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prompts WHERE subgroup_id = ?1",
            [id],
            |r| r.get(0),
        )?;
        Ok(Some(SubgroupDetails::new(subgroup, count)))
    }

    async fn create_group(&self, name: &str, order_id: i64) -> rusqlite::Result<Group> {
        let conn = self.connection.lock().await;
        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            order_id,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO prompt_groups (id, name, order_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![&group.id, &group.name, order_id, to_db_string(&group.created_at)],
        )?;
        Ok(group)
    }

    async fn create_subgroup(
        &self,
        group_id: &str,
        name: &str,
        order_id: i64,
    ) -> rusqlite::Result<Option<Subgroup>> {
        let conn = self.connection.lock().await;
        let parent: Option<i64> = conn
            .query_row("SELECT 1 FROM prompt_groups WHERE id = ?1", [group_id], |r| {
                r.get(0)
            })
            .optional()?;
        if parent.is_none() {
            return Ok(None);
        }
        let subgroup = Subgroup {
            id: uuid::Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            name: name.to_string(),
            order_id,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO prompt_subgroups (id, group_id, name, order_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &subgroup.id,
                &subgroup.group_id,
                &subgroup.name,
                order_id,
                to_db_string(&subgroup.created_at),
            ],
        )?;
        Ok(Some(subgroup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn groups_nest_subgroups_in_order() {
        let db = Database::open_in_memory().await.unwrap();
        let writing = db.create_group("Writing", 2).await.unwrap();
        let code = db.create_group("Code", 1).await.unwrap();
        db.create_subgroup(&writing.id, "Blogs", 1).await.unwrap().unwrap();
        db.create_subgroup(&writing.id, "Ads", 0).await.unwrap().unwrap();
        db.create_subgroup(&code.id, "Review", 0).await.unwrap().unwrap();

        let groups = db.list_groups().await.unwrap();
        assert_eq!(groups[0].group.name, "Code");
        assert_eq!(groups[1].group.name, "Writing");
        let names: Vec<_> = groups[1].subgroups.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Ads", "Blogs"]);

        assert_eq!(db.list_subgroups(Some(&code.id)).await.unwrap().len(), 1);
        assert_eq!(db.list_subgroups(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn subgroup_needs_existing_group() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.create_subgroup("nope", "x", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn details_count_prompts() {
        let db = Database::open_in_memory().await.unwrap();
        let g = db.create_group("G", 0).await.unwrap();
        let s = db.create_subgroup(&g.id, "Sales", 0).await.unwrap().unwrap();
        let d = db.subgroup_details(&s.id).await.unwrap().unwrap();
        assert_eq!(d.prompt_count, 0);
        assert_eq!(d.description, "Prompts for Sales");
        assert!(db.subgroup_details("missing").await.unwrap().is_none());
    }
}
