use anyhow::Result;

use super::DBLayer;
use crate::model::user::User;

impl DBLayer {
    // ============================================================
    // USER STORAGE
    // ============================================================
    fn user_key(id: &str) -> String {
        format!("user:{id}")
    }

    fn user_email_key(email: &str) -> String {
        format!("user_email:{email}")
    }

    /// Insert a user unless the email is already claimed. Returns `false` on a duplicate.
    pub async fn create_user(&self, user: &User) -> Result<bool> {
        let txn = self.txn();

        if let Some(email) = user.email.as_deref() {
            let email_key = Self::user_email_key(email);
            if txn.get_for_update(&email_key, true)?.is_some() {
                return Ok(false);
            }
            txn.put(&email_key, user.id.as_bytes())?;
        }

        txn.put(Self::user_key(&user.id), serde_json::to_vec(user)?)?;
        txn.commit()?;
        Ok(true)
    }

    pub async fn load_user(&self, id: &str) -> Result<Option<User>> {
        self.get_json(&Self::user_key(id))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(id) = self.get_string(&Self::user_email_key(email))? else {
            return Ok(None);
        };
        self.load_user(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_temp;

    fn user(id: &str, email: &str) -> User {
        User {
            id: id.into(),
            external_subject: format!("email:{email}"),
            email: Some(email.into()),
            display_name: None,
            created_ts: 0,
            password_hash: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_refused() {
        let (_dir, db) = open_temp();
        assert!(db.create_user(&user("u1", "a@example.com")).await.unwrap());
        assert!(!db.create_user(&user("u2", "a@example.com")).await.unwrap());

        let found = db.find_user_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(db.load_user("u2").await.unwrap().is_none());
    }
}
