//! Ledger DDL
//!
//! Applied statement by statement at startup. Every statement is
//! `IF NOT EXISTS` so re-applying is harmless.

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id              UUID PRIMARY KEY,
        user_id         UUID NOT NULL,
        account_number  VARCHAR(20) NOT NULL,
        account_type    VARCHAR(16) NOT NULL,
        balance         NUMERIC(20, 4) NOT NULL DEFAULT 0 CHECK (balance >= 0),
        currency        CHAR(3) NOT NULL,
        status          VARCHAR(16) NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS accounts_account_number_uidx ON accounts (account_number)",
    "CREATE INDEX IF NOT EXISTS accounts_user_id_idx ON accounts (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id               UUID PRIMARY KEY,
        from_account_id  UUID NULL,
        to_account_id    UUID NULL,
        amount           NUMERIC(20, 4) NOT NULL CHECK (amount > 0),
        currency         CHAR(3) NOT NULL,
        type             VARCHAR(16) NOT NULL,
        status           VARCHAR(16) NOT NULL,
        reference        VARCHAR(64) NOT NULL,
        description      TEXT NULL,
        metadata         JSONB NULL,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        completed_at     TIMESTAMPTZ NULL,
        CHECK (from_account_id IS NOT NULL OR to_account_id IS NOT NULL)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS transactions_reference_uidx ON transactions (reference)",
    "CREATE INDEX IF NOT EXISTS transactions_from_idx ON transactions (from_account_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS transactions_to_idx ON transactions (to_account_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS idempotency_keys (
        id               UUID PRIMARY KEY,
        idempotency_key  VARCHAR(255) NOT NULL,
        user_id          UUID NOT NULL,
        request_path     TEXT NOT NULL,
        request_hash     CHAR(64) NOT NULL,
        response_status  SMALLINT NULL,
        response_body    TEXT NULL,
        created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idempotency_keys_key_user_uidx ON idempotency_keys (idempotency_key, user_id)",
    "CREATE INDEX IF NOT EXISTS idempotency_keys_expires_at_idx ON idempotency_keys (expires_at)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_unique_indexes_present() {
        let ddl = STATEMENTS.join("\n");
        assert!(ddl.contains("ON accounts (account_number)"));
        assert!(ddl.contains("ON transactions (reference)"));
        assert!(ddl.contains("ON idempotency_keys (idempotency_key, user_id)"));
        assert!(ddl.contains("ON idempotency_keys (expires_at)"));
    }

    #[test]
    fn test_balance_never_negative_constraint() {
        assert!(STATEMENTS[0].contains("CHECK (balance >= 0)"));
    }
}
