use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::users;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserView {
    pub id: i32,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Selectable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Bare user record, mostly useful for seeding the in-memory store.
    pub fn named(id: i32, username: &str) -> Self {
        User {
            id,
            username: Some(username.to_string()),
            display_name: None,
            avatar_url: None,
            created_at: Some(Utc::now()),
        }
    }

    pub async fn find_by_id(user_id: i32, conn: &mut AsyncPgConnection) -> QueryResult<Option<User>> {
        users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .await
            .optional()
    }
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        UserView {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
        }
    }
}
