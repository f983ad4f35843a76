use rusqlite::Connection;

/// Initialize the main database schema (everything except audit logs)
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Users: students, instructors and admins share one table
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'student' CHECK (role IN ('student', 'instructor', 'admin')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_users_role ON users(role) WHERE deleted_at IS NULL;

        -- Passwordless sign-in codes (hashed, single use)
        CREATE TABLE IF NOT EXISTS login_codes (
            id INTEGER PRIMARY KEY,
            code_hash TEXT NOT NULL,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at INTEGER NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_login_codes_user ON login_codes(user_id, code_hash);
        CREATE INDEX IF NOT EXISTS idx_login_codes_expires ON login_codes(expires_at);

        -- Catalog
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            subtitle TEXT,
            description TEXT NOT NULL DEFAULT '',
            instructor_id TEXT NOT NULL REFERENCES users(id),
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            currency TEXT NOT NULL,
            level TEXT NOT NULL DEFAULT 'beginner',
            thumbnail_url TEXT,
            published INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_courses_published ON courses(published) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_courses_instructor ON courses(instructor_id);

        CREATE TABLE IF NOT EXISTS course_modules (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            position INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_course_modules_course ON course_modules(course_id, position);

        CREATE TABLE IF NOT EXISTS lessons (
            id TEXT PRIMARY KEY,
            module_id TEXT NOT NULL REFERENCES course_modules(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            video_blob TEXT,
            video_content_type TEXT,
            video_size INTEGER,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            is_preview INTEGER NOT NULL DEFAULT 0,
            position INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lessons_module ON lessons(module_id, position);
        CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id);

        -- Shopping cart (one row per course per user)
        CREATE TABLE IF NOT EXISTS cart_items (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, course_id)
        );

        CREATE TABLE IF NOT EXISTS coupons (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK (kind IN ('percentage', 'fixed')),
            value INTEGER NOT NULL CHECK (value > 0),
            currency TEXT,
            max_uses INTEGER,
            used_count INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER,
            course_id TEXT REFERENCES courses(id) ON DELETE SET NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Purchases snapshot cart prices at checkout time
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL CHECK (status IN ('pending', 'paid', 'failed', 'refunded')),
            currency TEXT NOT NULL,
            subtotal_cents INTEGER NOT NULL,
            discount_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            coupon_id TEXT REFERENCES coupons(id) ON DELETE SET NULL,
            coupon_code TEXT,
            provider TEXT NOT NULL,
            provider_checkout_id TEXT,
            provider_payment_id TEXT,
            provider_merchant_order_id TEXT,
            failure_reason TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            paid_at INTEGER,
            refunded_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_purchases_status ON purchases(status, created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_purchases_payment
            ON purchases(provider, provider_payment_id) WHERE provider_payment_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_purchases_merchant_order
            ON purchases(provider, provider_merchant_order_id) WHERE provider_merchant_order_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_purchases_checkout
            ON purchases(provider, provider_checkout_id) WHERE provider_checkout_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS purchase_items (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL REFERENCES purchases(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id),
            title TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            UNIQUE(purchase_id, course_id)
        );
        CREATE INDEX IF NOT EXISTS idx_purchase_items_course ON purchase_items(course_id);

        -- Access grants; revoked_at is set on refund
        CREATE TABLE IF NOT EXISTS enrollments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            purchase_id TEXT REFERENCES purchases(id),
            created_at INTEGER NOT NULL,
            revoked_at INTEGER,
            UNIQUE(user_id, course_id)
        );
        CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id) WHERE revoked_at IS NULL;

        -- Money movements: purchases are positive, refunds negative and linked to their parent
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL REFERENCES purchases(id),
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            provider_payment_id TEXT,
            currency TEXT NOT NULL,
            subtotal_cents INTEGER NOT NULL,
            discount_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            coupon_code TEXT,
            transaction_type TEXT NOT NULL CHECK (transaction_type IN ('purchase', 'refund')),
            parent_transaction_id TEXT REFERENCES transactions(id),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_purchase ON transactions(purchase_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_created ON transactions(created_at);

        -- Webhook replay protection
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created ON webhook_events(created_at);

        -- Learning progress
        CREATE TABLE IF NOT EXISTS lesson_progress (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            lesson_id TEXT NOT NULL REFERENCES lessons(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            watched_seconds INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            completed_at INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, lesson_id)
        );
        CREATE INDEX IF NOT EXISTS idx_lesson_progress_course ON lesson_progress(user_id, course_id);

        CREATE TABLE IF NOT EXISTS certificates (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            course_id TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
            verification_code TEXT NOT NULL UNIQUE,
            student_name TEXT NOT NULL,
            course_title TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            UNIQUE(user_id, course_id)
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            link TEXT,
            read_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_notifications_unread ON notifications(user_id) WHERE read_at IS NULL;

        -- Newsletter
        CREATE TABLE IF NOT EXISTS newsletter_subscribers (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            unsubscribe_token TEXT NOT NULL UNIQUE,
            subscribed_at INTEGER NOT NULL,
            unsubscribed_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS newsletter_campaigns (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('draft', 'sending', 'sent')),
            total_recipients INTEGER NOT NULL DEFAULT 0,
            sent_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL REFERENCES users(id),
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        );

        -- Support chat
        CREATE TABLE IF NOT EXISTS support_conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            subject TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('open', 'closed')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_support_conversations_user ON support_conversations(user_id);
        CREATE INDEX IF NOT EXISTS idx_support_conversations_status ON support_conversations(status, updated_at DESC);

        CREATE TABLE IF NOT EXISTS support_messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES support_conversations(id) ON DELETE CASCADE,
            sender_id TEXT NOT NULL REFERENCES users(id),
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_support_messages_conversation ON support_messages(conversation_id, created_at);
        "#,
    )?;
    Ok(())
}

/// Initialize the audit log database schema (separate DB file)
pub fn init_audit_db(conn: &Connection) -> rusqlite::Result<()> {
    // Append-only workload: WAL keeps writes sequential
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            actor_type TEXT NOT NULL CHECK (actor_type IN ('user', 'public', 'system')),
            user_id TEXT,
            user_email TEXT,
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            details TEXT,
            ip_address TEXT,
            user_agent TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_resource ON audit_logs(resource_type, resource_id);
        CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action, timestamp DESC);
        "#,
    )?;
    Ok(())
}
