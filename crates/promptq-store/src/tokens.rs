// Auth token records: token:{jwt} -> user_id, sliding 90-day TTL

use redis::AsyncCommands;

use crate::client::{keys, Store, StoreError};

impl Store {
    pub async fn put_token(
        &self,
        token: &str,
        user_id: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(keys::token(token), user_id, ttl_secs)
            .await?;
        Ok(())
    }

    /// The user id a token was issued to, if the token is still live.
    pub async fn get_token_user(&self, token: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.get(keys::token(token)).await?)
    }

    /// Slide the token's expiry window.
    pub async fn renew_token(&self, token: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.expire::<_, ()>(keys::token(token), ttl_secs as i64)
            .await?;
        Ok(())
    }
}
