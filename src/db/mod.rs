// Database access layer (SQLite via sqlx).

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::rating;

/// Domain errors for match completion; plain queries surface `sqlx::Error`.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("match not found")]
    MatchNotFound,
    #[error("match already completed")]
    MatchAlreadyCompleted,
    #[error("winner must be one of the match participants")]
    InvalidWinner,
    #[error("player not found")]
    PlayerNotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub display_name: String,
    pub bio: Option<String>,
    pub role: String,
    pub rating: i32,
    pub created_at: String,
    pub updated_at: String,
}

/// A match between two players. `winner_id`, both deltas, and
/// `completed_at` are set together when the result is reported.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Match {
    pub id: i64,
    pub player1_id: i64,
    pub player2_id: i64,
    pub winner_id: Option<i64>,
    pub delta_p1: Option<i32>,
    pub delta_p2: Option<i32>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiToken {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub scopes: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

/// Stored OAuth tokens for the external tournament provider.
/// `expires_at` is a unix timestamp in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OauthConnection {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub expires_at: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Local record of a tournament created on the external provider.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tournament {
    pub id: i64,
    pub user_id: i64,
    pub external_id: String,
    pub name: String,
    pub url: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardRow {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub rating: i32,
    pub wins: i64,
    pub losses: i64,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                display_name TEXT NOT NULL DEFAULT '',
                bio TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                rating INTEGER NOT NULL DEFAULT 1600,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player1_id INTEGER NOT NULL REFERENCES users(id),
                player2_id INTEGER NOT NULL REFERENCES users(id),
                winner_id INTEGER REFERENCES users(id),
                delta_p1 INTEGER,
                delta_p2 INTEGER,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                completed_at TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                scopes TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_used_at TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tournaments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<User, sqlx::Error> {
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, display_name, rating) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .bind(rating::INITIAL_RATING)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_user(
        &self,
        id: i64,
        display_name: Option<&str>,
        bio: Option<&str>,
    ) -> Result<Option<User>, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET display_name = COALESCE(?, display_name), bio = COALESCE(?, bio), updated_at = datetime('now') WHERE id = ?",
        )
        .bind(display_name)
        .bind(bio)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_user(id).await
    }

    pub async fn list_players(&self, limit: i64, offset: i64) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    // ── Matches ───────────────────────────────────────────────────────

    pub async fn create_match(
        &self,
        player1_id: i64,
        player2_id: i64,
    ) -> Result<Match, sqlx::Error> {
        sqlx::query_as::<_, Match>(
            "INSERT INTO matches (player1_id, player2_id) VALUES (?, ?) RETURNING *",
        )
        .bind(player1_id)
        .bind(player2_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_match(&self, id: i64) -> Result<Option<Match>, sqlx::Error> {
        sqlx::query_as::<_, Match>("SELECT * FROM matches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List matches, newest first. `completed` filters on whether the
    /// result has been reported; `None` returns both.
    pub async fn list_matches(
        &self,
        completed: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Match>, sqlx::Error> {
        let filter = match completed {
            Some(true) => "WHERE completed_at IS NOT NULL",
            Some(false) => "WHERE completed_at IS NULL",
            None => "",
        };
        let sql = format!("SELECT * FROM matches {filter} ORDER BY id DESC LIMIT ? OFFSET ?");
        sqlx::query_as::<_, Match>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn list_matches_for_player(
        &self,
        player_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Match>, sqlx::Error> {
        sqlx::query_as::<_, Match>(
            "SELECT * FROM matches WHERE player1_id = ? OR player2_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(player_id)
        .bind(player_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// All completed matches a player took part in, used for win/loss stats.
    pub async fn list_completed_matches_for_player(
        &self,
        player_id: i64,
    ) -> Result<Vec<Match>, sqlx::Error> {
        sqlx::query_as::<_, Match>(
            "SELECT * FROM matches WHERE completed_at IS NOT NULL AND (player1_id = ? OR player2_id = ?) ORDER BY id",
        )
        .bind(player_id)
        .bind(player_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete a match only if its result has not been reported yet.
    /// Returns false when the match is missing or already completed.
    pub async fn delete_pending_match(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM matches WHERE id = ? AND completed_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Report the result of a match and apply the rating adjustment.
    ///
    /// Runs as a single transaction: the completion check, both rating
    /// updates, and the match update commit or roll back together, so a
    /// result is applied exactly once even under concurrent reports.
    /// The first committed reporter wins; later attempts observe
    /// `completed_at` and fail with `MatchAlreadyCompleted`.
    pub async fn report_match_result(
        &self,
        match_id: i64,
        winner_id: i64,
    ) -> Result<Match, DbError> {
        let mut tx = self.pool.begin().await?;

        let m = sqlx::query_as::<_, Match>("SELECT * FROM matches WHERE id = ?")
            .bind(match_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::MatchNotFound)?;

        if m.completed_at.is_some() {
            return Err(DbError::MatchAlreadyCompleted);
        }
        if winner_id != m.player1_id && winner_id != m.player2_id {
            return Err(DbError::InvalidWinner);
        }

        let rating_p1: i32 = sqlx::query_scalar("SELECT rating FROM users WHERE id = ?")
            .bind(m.player1_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::PlayerNotFound)?;
        let rating_p2: i32 = sqlx::query_scalar("SELECT rating FROM users WHERE id = ?")
            .bind(m.player2_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::PlayerNotFound)?;

        let adj = rating::compute_adjustment(rating_p1, rating_p2, winner_id == m.player1_id);

        sqlx::query("UPDATE users SET rating = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(adj.new_rating_p1)
            .bind(m.player1_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET rating = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(adj.new_rating_p2)
            .bind(m.player2_id)
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query_as::<_, Match>(
            "UPDATE matches SET winner_id = ?, delta_p1 = ?, delta_p2 = ?, completed_at = datetime('now') WHERE id = ? RETURNING *",
        )
        .bind(winner_id)
        .bind(adj.delta_p1)
        .bind(adj.delta_p2)
        .bind(match_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    // ── Leaderboard ───────────────────────────────────────────────────

    pub async fn leaderboard(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
        sqlx::query_as::<_, LeaderboardRow>(
            r#"
            SELECT u.id, u.username, u.display_name, u.rating,
                (SELECT COUNT(*) FROM matches m WHERE m.winner_id = u.id) AS wins,
                (SELECT COUNT(*) FROM matches m
                    WHERE m.completed_at IS NOT NULL
                      AND (m.player1_id = u.id OR m.player2_id = u.id)
                      AND m.winner_id != u.id) AS losses
            FROM users u
            ORDER BY u.rating DESC, u.id ASC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    // ── API tokens ────────────────────────────────────────────────────

    pub async fn create_api_token(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
        scopes: &str,
    ) -> Result<ApiToken, sqlx::Error> {
        sqlx::query_as::<_, ApiToken>(
            "INSERT INTO api_tokens (user_id, name, token_hash, scopes) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(user_id)
        .bind(name)
        .bind(token_hash)
        .bind(scopes)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_api_tokens(&self, user_id: i64) -> Result<Vec<ApiToken>, sqlx::Error> {
        sqlx::query_as::<_, ApiToken>(
            "SELECT * FROM api_tokens WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_api_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ApiToken>, sqlx::Error> {
        sqlx::query_as::<_, ApiToken>("SELECT * FROM api_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_token_last_used(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_tokens SET last_used_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete an API token owned by the given user.
    pub async fn delete_api_token(&self, id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── OAuth connections ─────────────────────────────────────────────

    /// Insert or replace the provider connection for a user. A user has
    /// at most one connection.
    pub async fn upsert_oauth_connection(
        &self,
        user_id: i64,
        provider: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<OauthConnection, sqlx::Error> {
        sqlx::query_as::<_, OauthConnection>(
            r#"
            INSERT INTO oauth_connections (user_id, provider, access_token, refresh_token, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                provider = excluded.provider,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = datetime('now')
            RETURNING *
        "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_oauth_connection(
        &self,
        user_id: i64,
    ) -> Result<Option<OauthConnection>, sqlx::Error> {
        sqlx::query_as::<_, OauthConnection>("SELECT * FROM oauth_connections WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn delete_oauth_connection(&self, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM oauth_connections WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Tournaments ───────────────────────────────────────────────────

    pub async fn create_tournament(
        &self,
        user_id: i64,
        external_id: &str,
        name: &str,
        url: &str,
    ) -> Result<Tournament, sqlx::Error> {
        sqlx::query_as::<_, Tournament>(
            "INSERT INTO tournaments (user_id, external_id, name, url) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(user_id)
        .bind(external_id)
        .bind(name)
        .bind(url)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_tournaments(&self, user_id: i64) -> Result<Vec<Tournament>, sqlx::Error> {
        sqlx::query_as::<_, Tournament>(
            "SELECT * FROM tournaments WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}
