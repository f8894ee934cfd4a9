use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::prompts::FavoriteStore;

use super::database::Database;
use super::time::to_db_string;

#[async_trait]
impl FavoriteStore for Database {
    async fn set_favorite(
        &self,
        user_id: &str,
        prompt_id: &str,
        favorite: bool,
    ) -> rusqlite::Result<Option<i64>> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM prompts WHERE id = ?1", [prompt_id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let changed = if favorite {
            tx.execute(
                "INSERT OR IGNORE INTO favorites (user_id, prompt_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, prompt_id, to_db_string(&Utc::now())],
            )?
        } else {
            tx.execute(
                "DELETE FROM favorites WHERE user_id = ?1 AND prompt_id = ?2",
                rusqlite::params![user_id, prompt_id],
            )?
        };
        // 仅在真正变化时调整计数，重复操作为空操作
        if changed > 0 {
            let delta: i64 = if favorite { 1 } else { -1 };
            tx.execute(
                "UPDATE prompts SET favorites_count = MAX(favorites_count + ?1, 0) WHERE id = ?2",
                rusqlite::params![delta, prompt_id],
            )?;
        }
        let count: i64 = tx.query_row(
            "SELECT favorites_count FROM prompts WHERE id = ?1",
            [prompt_id],
            |r| r.get(0),
        )?;
        tx.commit()?;
        Ok(Some(count))
    }

    async fn list_favorites(&self, user_id: &str) -> rusqlite::Result<Vec<String>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT prompt_id FROM favorites WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptStore;
    use crate::storage::database_prompts::tests::{draft, seed};
    use crate::users::{NewUser, UserStore};

    async fn fan(db: &Database) -> String {
        db.create_user(NewUser {
            email: "fan@example.com".into(),
            name: None,
            password_hash: "x".into(),
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn favorite_toggles_keep_count_in_step() {
        let db = Database::open_in_memory().await.unwrap();
        let (author, sub) = seed(&db).await;
        let fan = fan(&db).await;
        let p = db.create_prompt(&draft(&sub, "x"), &[], &author).await.unwrap();

        assert_eq!(db.set_favorite(&fan, &p.id, true).await.unwrap(), Some(1));
        assert_eq!(db.set_favorite(&fan, &p.id, true).await.unwrap(), Some(1));
        assert_eq!(db.set_favorite(&author, &p.id, true).await.unwrap(), Some(2));
        assert_eq!(db.list_favorites(&fan).await.unwrap(), vec![p.id.clone()]);

        assert_eq!(db.set_favorite(&fan, &p.id, false).await.unwrap(), Some(1));
        assert_eq!(db.set_favorite(&fan, &p.id, false).await.unwrap(), Some(1));
        assert!(db.list_favorites(&fan).await.unwrap().is_empty());
        assert_eq!(db.get_prompt(&p.id).await.unwrap().unwrap().favorites_count, 1);
    }

    #[tokio::test]
    async fn favorite_on_missing_prompt_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        let fan = fan(&db).await;
        assert_eq!(db.set_favorite(&fan, "nope", true).await.unwrap(), None);
    }
}
